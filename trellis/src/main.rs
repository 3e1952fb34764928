mod common;
mod embed_nodes;
mod fit_graph_embed;
mod fit_niche_gmm;
mod graph_input;
mod hop_gather;
mod walk_sampler;

use clap::{Parser, Subcommand};
use embed_nodes::*;
use fit_graph_embed::*;
use fit_niche_gmm::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "TRELLIS",
    long_about = "Tissue niche embedding over spatial neighbourhood graphs\n\n\
		  TRELLIS trains a link-prediction GraphSAGE encoder on a spatial\n\
		  neighbourhood graph, applies the trained encoder to produce\n\
		  per-sample node embeddings, and clusters the embeddings into\n\
		  spatial niches with Gaussian mixture models.",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a link-prediction graph embedding model",
        long_about = "Train a GraphSAGE encoder with attentional aggregation.\n\n\
		      Pipeline stages:\n\
		      1. Load node features + spatial edges (or coordinates + kNN)\n\
		      2. Run uniform random walks from the seed roots; every\n\
		         (root, visited) pair is a positive example, matched by a\n\
		         degree^0.75 negative tail\n\
		      3. Sample fixed-size neighbourhoods per minibatch and train\n\
		         the encoder against the logistic link loss (AdamW)\n\n\
		      Outputs:\n\
		      - {out}.model.safetensors: encoder parameters\n\
		      - {out}.model.json: model configuration\n\
		      - {out}.loss.parquet: per-epoch mean link loss"
    )]
    Train(TrainArgs),

    #[command(
        about = "Embed all nodes of a sample with a trained model",
        long_about = "Apply a trained encoder to one sample's graph.\n\n\
		      Outputs:\n\
		      - {out_dir}/{sample}_{dim}_embeddings.parquet\n\
		      - {out_dir}/{sample}_node_meta.csv (discovery anchor\n\
		        for `trellis cluster`)"
    )]
    Embed(EmbedArgs),

    #[command(
        about = "Cluster embeddings into spatial niches by GMM sweep",
        long_about = "Fit one Gaussian mixture per cluster count over the\n\
		      concatenated per-sample embeddings.\n\n\
		      Pipeline stages:\n\
		      1. Discover samples via *{meta_suffix} files (sorted order)\n\
		      2. Derive embedding files by suffix substitution; every\n\
		         derived file must exist before loading starts\n\
		      3. Concatenate embeddings, recording per-sample row counts\n\
		      4. Fit a seeded GMM per cluster count and slice the labels\n\
		         back per sample by cumulative offsets\n\n\
		      Outputs:\n\
		      - {out}/gmm{k}/{sample}_clusters.txt (one label per row)"
    )]
    Cluster(ClusterArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_graph_embed(args)?;
        }
        Commands::Embed(args) => {
            fit_embed_nodes(args)?;
        }
        Commands::Cluster(args) => {
            fit_niche_gmm(args)?;
        }
    }

    Ok(())
}
