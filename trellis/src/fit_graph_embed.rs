use crate::common::*;
use crate::graph_input::*;
use crate::hop_gather::gather_hops;
use crate::walk_sampler::*;

use candle_nn::{AdamW, Optimizer};
use candle_sage::loss::link_logit_loss;
use candle_sage::sage::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        short = 'f',
        required = true,
        help = "Node feature file (nodes x features)",
        long_help = "Node feature matrix, one row per node.\n\
		     `.parquet` (first column = node names) or delimited\n\
		     text with a header line and a node-name column."
    )]
    pub features: Box<str>,

    #[arg(
        long,
        short = 'e',
        help = "Spatial edge list file",
        long_help = "Edge list with one `src dst [dist]` row per edge.\n\
		     Endpoints are node names or 0-based indices.\n\
		     Mutually supplementary with --coords."
    )]
    pub edges: Option<Box<str>>,

    #[arg(
        long,
        short = 'c',
        help = "Spatial coordinate file (nodes x 2)",
        long_help = "Spatial coordinates, one row per node; a kNN graph\n\
		     is built with --knn when no edge list is given."
    )]
    pub coords: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = 10,
        help = "Nearest neighbours for the coordinate graph"
    )]
    pub knn: usize,

    #[arg(
        long,
        short = 'r',
        required = true,
        help = "Walk root file",
        long_help = "Seed nodes for the unsupervised walks, one per\n\
		     line (node name or 0-based index); a single header\n\
		     line is tolerated."
    )]
    pub roots: Box<str>,

    #[arg(
        long,
        default_value_t = 2,
        help = "Walks per root per epoch"
    )]
    pub num_walks: usize,

    #[arg(
        long,
        default_value_t = 3,
        help = "Length of each walk (including the root)"
    )]
    pub walk_length: usize,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![10, 5],
        help = "Neighbour sample sizes per layer",
        long_help = "Neighbour sample sizes, one per aggregation layer\n\
		     (comma-separated). Example: 10,5"
    )]
    pub num_samples: Vec<usize>,

    #[arg(
        long,
        short = 'd',
        default_value_t = 50,
        help = "Embedding dimension of each layer"
    )]
    pub dim: usize,

    #[arg(
        long,
        short = 'i',
        default_value_t = 4,
        help = "Number of training epochs"
    )]
    pub epochs: usize,

    #[arg(
        long,
        default_value_t = 100,
        help = "Minibatch size (node pairs)"
    )]
    pub batch_size: usize,

    #[arg(
        long,
        default_value_t = 1e-3,
        help = "Learning rate"
    )]
    pub learning_rate: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    pub device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "Device ordinal for cuda/metal"
    )]
    pub device_no: usize,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.model.safetensors\n\
		     - {out}.model.json\n\
		     - {out}.loss.parquet"
    )]
    pub out: Box<str>,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub fn fit_graph_embed(args: &TrainArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    train_graph_embedding(args)
}

pub fn train_graph_embedding(args: &TrainArgs) -> anyhow::Result<()> {
    // 1. Spatial graph, features, walk roots
    let data = read_spatial_graph(GraphInputArgs {
        feature_file: &args.features,
        edge_file: args.edges.as_deref(),
        coord_file: args.coords.as_deref(),
        knn: args.knn,
    })?;

    let roots = read_root_nodes(&args.roots, &data.node_names)?;
    info!("{} walk roots", roots.len());

    // 2. Walk sampler and model
    let sampler = UnsupervisedWalkSampler::new(
        &data.graph,
        roots,
        WalkSamplerArgs {
            num_walks: args.num_walks,
            walk_length: args.walk_length,
        },
    )?;

    let config = SageConfig {
        dim_input: data.features.ncols(),
        layer_dims: vec![args.dim; args.num_samples.len()],
        num_samples: args.num_samples.clone(),
        use_bias: true,
    };

    let dev = select_device(&args.device, args.device_no)?;
    let parameters = candle_nn::VarMap::new();
    let param_builder =
        candle_nn::VarBuilder::from_varmap(&parameters, candle_core::DType::F32, &dev);
    let encoder = GraphSageEncoder::new(config.clone(), param_builder)?;

    let features_nd = mat_to_tensor(&data.features, &dev)?;

    info!(
        "link model: {} features -> {:?} with {:?} samples, {} pairs/epoch",
        config.dim_input,
        config.layer_dims,
        config.num_samples,
        sampler.pairs_per_epoch()
    );

    // 3. Link-prediction training
    let mut adam = AdamW::new_lr(parameters.all_vars(), args.learning_rate as f64)?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let pb = ProgressBar::new(args.epochs as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = Vec::with_capacity(args.epochs);

    for epoch in 0..args.epochs {
        let pairs = sampler.epoch_pairs(&mut rng);

        let mut epoch_loss = 0f32;
        let mut n_batches = 0usize;

        for chunk in pairs.chunks(args.batch_size) {
            let heads: Vec<usize> = chunk.iter().map(|&(h, _, _)| h).collect();
            let tails: Vec<usize> = chunk.iter().map(|&(_, t, _)| t).collect();
            let labels: Vec<f32> = chunk.iter().map(|&(_, _, y)| y).collect();

            let head_hops = gather_hops(&data.graph, &features_nd, &heads, &config, &mut rng, &dev)?;
            let tail_hops = gather_hops(&data.graph, &features_nd, &tails, &config, &mut rng, &dev)?;

            let z_head = encoder.forward(&head_hops)?;
            let z_tail = encoder.forward(&tail_hops)?;
            let scores = LinkPredictionHead::score(&z_head, &z_tail)?;

            let labels = candle_core::Tensor::from_vec(labels, (chunk.len(),), &dev)?;
            let loss = link_logit_loss(&scores, &labels)?.mean_all()?;
            adam.backward_step(&loss)?;

            epoch_loss += loss.to_scalar::<f32>()?;
            n_batches += 1;
        }

        let mean_loss = epoch_loss / n_batches.max(1) as f32;
        loss_trace.push(mean_loss);
        pb.inc(1);

        if args.verbose {
            info!("[{}] link loss: {}", epoch + 1, mean_loss);
        }
    }
    pb.finish_and_clear();

    // 4. Persist model and training trace; the inner-product link
    // head has no parameters, so the encoder weights are the model.
    info!("Writing down the model parameters");

    parameters.save(format!("{}.model.safetensors", args.out))?;
    config.to_json_file(&format!("{}.model.json", args.out))?;
    write_loss_trace(&loss_trace, &format!("{}.loss.parquet", args.out))?;

    info!("Done");
    Ok(())
}

fn write_loss_trace(loss: &[f32], file_path: &str) -> anyhow::Result<()> {
    let mat = Mat::from_column_slice(loss.len(), 1, loss);

    let epochs: Vec<Box<str>> = (0..loss.len())
        .map(|x| (x + 1).to_string().into_boxed_str())
        .collect();
    let columns: Vec<Box<str>> = vec!["link_loss".into()];

    mat.to_parquet_with_names(file_path, Some(&epochs), Some(&columns))
}
