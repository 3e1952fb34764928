use crate::common::*;
use crate::graph_input::*;
use crate::hop_gather::gather_hops;

use candle_sage::sage::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[arg(
        long,
        short = 'f',
        required = true,
        help = "Node feature file (nodes x features)"
    )]
    pub features: Box<str>,

    #[arg(long, short = 'e', help = "Spatial edge list file")]
    pub edges: Option<Box<str>>,

    #[arg(long, short = 'c', help = "Spatial coordinate file (nodes x 2)")]
    pub coords: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = 10,
        help = "Nearest neighbours for the coordinate graph"
    )]
    pub knn: usize,

    #[arg(
        long,
        short = 'm',
        required = true,
        help = "Trained model header",
        long_help = "Header used by `trellis train --out`; reads\n\
		     {model}.model.safetensors and {model}.model.json."
    )]
    pub model: Box<str>,

    #[arg(
        long,
        short = 's',
        required = true,
        help = "Sample name",
        long_help = "Sample name prefixing the outputs:\n\
		     - {out_dir}/{sample}_{dim}_embeddings.parquet\n\
		     - {out_dir}/{sample}_node_meta.csv"
    )]
    pub sample: Box<str>,

    #[arg(long, default_value = ".", help = "Output directory")]
    pub out_dir: Box<str>,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Nodes per evaluation block"
    )]
    pub block_size: usize,

    #[arg(long, default_value_t = 42, help = "Neighbour sampling seed")]
    pub seed: u64,

    #[arg(long, value_enum, default_value = "cpu", help = "Candle device")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device ordinal for cuda/metal")]
    pub device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub fn fit_embed_nodes(args: &EmbedArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    embed_all_nodes(args)
}

pub fn embed_all_nodes(args: &EmbedArgs) -> anyhow::Result<()> {
    let config = SageConfig::from_json_file(&format!("{}.model.json", args.model))?;

    let data = read_spatial_graph(GraphInputArgs {
        feature_file: &args.features,
        edge_file: args.edges.as_deref(),
        coord_file: args.coords.as_deref(),
        knn: args.knn,
    })?;

    if data.features.ncols() != config.dim_input {
        anyhow::bail!(
            "model expects {} features, sample has {}",
            config.dim_input,
            data.features.ncols()
        );
    }

    let dev = select_device(&args.device, args.device_no)?;
    let mut parameters = candle_nn::VarMap::new();
    let param_builder =
        candle_nn::VarBuilder::from_varmap(&parameters, candle_core::DType::F32, &dev);
    let encoder = GraphSageEncoder::new(config.clone(), param_builder)?;
    parameters.load(format!("{}.model.safetensors", args.model))?;

    let features_nd = mat_to_tensor(&data.features, &dev)?;
    let nn = data.graph.num_nodes();
    let dim = config.dim_embedding();

    let jobs = create_jobs(nn, Some(args.block_size));
    let pb = ProgressBar::new(jobs.len() as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut embeddings = Mat::zeros(nn, dim);

    for (lb, ub) in jobs {
        let nodes: Vec<usize> = (lb..ub).collect();
        let hops = gather_hops(&data.graph, &features_nd, &nodes, &config, &mut rng, &dev)?;
        let z = encoder.forward(&hops)?;
        embeddings.rows_range_mut(lb..ub).copy_from(&tensor_to_mat(&z)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    mkdir(&args.out_dir)?;

    let embed_file = format!(
        "{}/{}_{}_embeddings.parquet",
        args.out_dir, args.sample, dim
    );
    embeddings.to_parquet_with_names(&embed_file, Some(&data.node_names), None)?;

    let meta_file = format!("{}/{}_node_meta.csv", args.out_dir, args.sample);
    write_types(&data.node_names, &meta_file)?;

    info!(
        "Wrote {} x {} embeddings to {} (meta: {})",
        nn, dim, embed_file, meta_file
    );
    Ok(())
}
