use crate::common::*;
use crate::integrate_input::*;
use crate::mde::*;

use candle_sage::data_loader::InMemoryData;
use candle_sage::model_traits::EncoderModuleT;
use candle_sage::vae::*;
use candle_sage::vae_train::{TrainConfig, TrainTrace, Vae};

#[derive(Args, Debug)]
pub struct IntegrateArgs {
    #[arg(
        long,
        required = true,
        help = "Sparse count matrix (.mtx or .mtx.gz, genes x cells)",
        long_help = "Combined count matrix in matrix-market coordinate\n\
		     format, genes as rows and cells as columns."
    )]
    pub mtx: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Gene name file (one per matrix row)"
    )]
    pub rows: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Cell name file (one per matrix column)"
    )]
    pub cols: Box<str>,

    #[arg(
        long,
        short = 'b',
        required = true,
        help = "Per-cell batch membership file",
        long_help = "One batch label per line, aligned with the cell\n\
		     name file; the label becomes the conditioning\n\
		     covariate of encoder and decoder."
    )]
    pub batch: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.latent.parquet (cells x n_latent)\n\
		     - {out}.mde.parquet (cells x 2)\n\
		     - {out}.log_likelihood.parquet"
    )]
    pub out: Box<str>,

    #[arg(
        long,
        short = 't',
        default_value_t = 10,
        help = "Latent dimension"
    )]
    pub n_latent: usize,

    #[arg(
        long,
        short = 'e',
        value_delimiter(','),
        default_values_t = vec![128, 128],
        help = "Encoder hidden layers",
        long_help = "Encoder hidden layers (comma-separated).\n\
		     Example: 128,128"
    )]
    pub encoder_layers: Vec<usize>,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![128],
        help = "Decoder hidden layers"
    )]
    pub decoder_layers: Vec<usize>,

    #[arg(
        long,
        short = 'i',
        default_value_t = 400,
        help = "Number of training epochs"
    )]
    pub epochs: usize,

    #[arg(long, default_value_t = 128, help = "Minibatch size")]
    pub minibatch_size: usize,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    pub learning_rate: f32,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "KL annealing warmup epochs",
        long_help = "Number of epochs for the KL weight to warm up from\n\
		     0 to 1: kl_weight = 1 - exp(-epoch / warmup).\n\
		     Set to 0 to disable annealing."
    )]
    pub kl_warmup_epochs: f64,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Cells per evaluation block for latent extraction"
    )]
    pub block_size: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(long, value_enum, default_value = "cpu", help = "Candle device")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device ordinal for cuda/metal")]
    pub device_no: usize,

    #[arg(
        long,
        default_value_t = 15,
        help = "Nearest neighbours for the 2D layout graph"
    )]
    pub mde_knn: usize,

    #[arg(long, default_value_t = 500, help = "2D layout iterations")]
    pub mde_iter: usize,

    #[arg(
        long,
        default_value_t = 5,
        help = "Repulsion samples per edge per layout iteration"
    )]
    pub mde_negatives: usize,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub fn fit_integrate(args: &IntegrateArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    integrate_batches(args)
}

pub fn integrate_batches(args: &IntegrateArgs) -> anyhow::Result<()> {
    // 1. Read counts into sparse storage with batch membership
    let data = read_integrate_data(IntegrateInputArgs {
        mtx_file: &args.mtx,
        row_file: &args.rows,
        column_file: &args.cols,
        batch_file: &args.batch,
    })?;

    let onehot = data.batch_onehot();

    // 2. Batch-conditioned NB-VAE
    let dev = select_device(&args.device, args.device_no)?;
    let parameters = candle_nn::VarMap::new();
    let param_builder =
        candle_nn::VarBuilder::from_varmap(&parameters, candle_core::DType::F32, &dev);

    let encoder = GaussianEncoder::new(
        GaussianEncoderArgs {
            n_features: data.num_genes(),
            n_covariates: data.num_batches(),
            n_latent: args.n_latent,
            layers: &args.encoder_layers,
        },
        param_builder.clone(),
    )?;

    let decoder = NbDecoder::new(
        NbDecoderArgs {
            n_genes: data.num_genes(),
            n_covariates: data.num_batches(),
            n_latent: args.n_latent,
            layers: &args.decoder_layers,
        },
        param_builder,
    )?;

    info!(
        "NB-VAE: {} genes -> {:?} -> {} latent, conditioned on {} batches",
        data.num_genes(),
        args.encoder_layers,
        args.n_latent,
        data.num_batches()
    );

    let counts_dense = data.dense_cell_block(0, data.num_cells());
    let mut loader = InMemoryData::new_with_covariate(&counts_dense, &onehot)?;
    drop(counts_dense);

    let mut vae = Vae::build(&encoder, &decoder, &parameters);
    let trace = vae.train_encoder_decoder(
        &mut loader,
        &TrainConfig {
            learning_rate: args.learning_rate,
            batch_size: args.minibatch_size,
            num_epochs: args.epochs,
            kl_warmup_epochs: args.kl_warmup_epochs,
            device: dev.clone(),
            seed: args.seed,
            verbose: args.verbose,
            show_progress: !args.verbose,
        },
    )?;

    write_trace(&trace, &format!("{}.log_likelihood.parquet", args.out))?;

    // 3. Latent representation for every cell (eval mode, in order)
    info!("Writing down the latent states");

    let latent = evaluate_latent(&data, &onehot, &encoder, &dev, args.block_size)?;
    if latent.nrows() != data.num_cells() {
        anyhow::bail!(
            "latent has {} rows for {} cells",
            latent.nrows(),
            data.num_cells()
        );
    }

    latent.to_parquet_with_names(
        &format!("{}.latent.parquet", args.out),
        Some(&data.cell_names),
        None,
    )?;

    // 4. Minimum-distortion 2D embedding of the latent rows
    info!("Computing the 2D embedding");

    let coords = mde_embed(
        &latent,
        &MdeArgs {
            knn: args.mde_knn,
            n_iter: args.mde_iter,
            n_negatives: args.mde_negatives,
            seed: args.seed,
            ..Default::default()
        },
    )?;

    let coord_cols: Vec<Box<str>> = vec!["x".into(), "y".into()];
    coords.to_parquet_with_names(
        &format!("{}.mde.parquet", args.out),
        Some(&data.cell_names),
        Some(&coord_cols),
    )?;

    info!("Done");
    Ok(())
}

fn evaluate_latent(
    data: &IntegrateData,
    onehot: &Mat,
    encoder: &GaussianEncoder,
    dev: &candle_core::Device,
    block_size: usize,
) -> anyhow::Result<Mat> {
    let ntot = data.num_cells();
    let kk = encoder.dim_latent();

    let jobs = create_jobs(ntot, Some(block_size));
    let pb = ProgressBar::new(jobs.len() as u64);

    let mut latent = Mat::zeros(ntot, kk);
    for (lb, ub) in jobs {
        let x_block = data.dense_cell_block(lb, ub);
        let x_nd = mat_to_tensor(&x_block, dev)?;
        let covar_nb = mat_to_tensor(&onehot.rows_range(lb..ub).into_owned(), dev)?;

        let (z_nk, _) = encoder.forward_t(&x_nd, Some(&covar_nb), false)?;
        latent.rows_range_mut(lb..ub).copy_from(&tensor_to_mat(&z_nk)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(latent)
}

fn write_trace(trace: &TrainTrace, file_path: &str) -> anyhow::Result<()> {
    let mat = Mat::from_columns(&[
        DVec::from_vec(trace.llik.clone()),
        DVec::from_vec(trace.kl.clone()),
    ]);

    let score_types: Vec<Box<str>> = vec!["log_likelihood".into(), "kl_divergence".into()];
    let epochs: Vec<Box<str>> = (0..mat.nrows())
        .map(|x| (x + 1).to_string().into_boxed_str())
        .collect();

    mat.to_parquet_with_names(file_path, Some(&epochs), Some(&score_types))
}
