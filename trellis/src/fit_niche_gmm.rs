//! Gaussian-mixture niche clustering over per-sample embeddings
//!
//! Samples are discovered through their metadata files, embedding
//! files are derived by suffix substitution and verified to exist
//! before anything is loaded, and the same sorted discovery order
//! drives both concatenation and label slicing.

use crate::common::*;
use matrix_extra::gmm::{GaussianMixture, GmmArgs};
use std::collections::HashSet;

#[derive(Args, Debug)]
pub struct ClusterArgs {
    #[arg(
        long,
        short = 'd',
        required = true,
        help = "Directory with per-sample embedding outputs",
        long_help = "Directory containing, per sample:\n\
		     - {sample}{meta_suffix}\n\
		     - {sample}{embed_suffix}\n\
		     as written by `trellis embed`."
    )]
    pub dir: Box<str>,

    #[arg(
        long,
        default_value = "_node_meta.csv",
        help = "Metadata filename suffix used for sample discovery"
    )]
    pub meta_suffix: Box<str>,

    #[arg(
        long,
        default_value = "_50_embeddings.parquet",
        help = "Embedding filename suffix derived per sample"
    )]
    pub embed_suffix: Box<str>,

    #[arg(
        long,
        short = 'k',
        value_delimiter(','),
        default_values_t = vec![7, 8, 9, 10, 11, 12, 13],
        help = "Cluster counts to sweep",
        long_help = "Mixture sizes to fit, one model per value\n\
		     (comma-separated). Example: 7,8,9"
    )]
    pub k_list: Vec<usize>,

    #[arg(long, default_value_t = 100, help = "Maximum EM iterations")]
    pub max_iter: usize,

    #[arg(
        long,
        default_value_t = 1e-4,
        help = "EM convergence tolerance (mean log-likelihood)"
    )]
    pub tol: f64,

    #[arg(
        long,
        default_value_t = 42,
        help = "Seed for k-means++ initialization",
        long_help = "Seed for k-means++ initialization.\n\
		     Fixed by default so reruns on unchanged inputs\n\
		     reproduce the same label files."
    )]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        help = "Output directory (defaults to --dir)",
        long_help = "Output directory; one gmm{k}/ subdirectory per\n\
		     cluster count, each holding {sample}_clusters.txt."
    )]
    pub out: Option<Box<str>>,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub fn fit_niche_gmm(args: &ClusterArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    cluster_embeddings(args)
}

pub fn cluster_embeddings(args: &ClusterArgs) -> anyhow::Result<()> {
    let out_dir = args.out.as_deref().unwrap_or(args.dir.as_ref());

    // 1. Discover samples through their metadata files (sorted)
    let meta_files = list_files_with_suffix(&args.dir, &args.meta_suffix)?;
    if meta_files.is_empty() {
        anyhow::bail!(
            "no *{} files under {}",
            args.meta_suffix,
            args.dir
        );
    }

    let sample_names: Vec<&str> = meta_files
        .iter()
        .map(|f| f.trim_end_matches(args.meta_suffix.as_ref()))
        .collect();

    info!("{} samples discovered under {}", sample_names.len(), args.dir);

    // 2. Derive embedding files and check existence before loading
    let embed_files: Vec<String> = sample_names
        .iter()
        .map(|s| format!("{}/{}{}", args.dir, s, args.embed_suffix))
        .collect();

    for file in embed_files.iter() {
        if !std::path::Path::new(file).is_file() {
            anyhow::bail!("derived embedding file {} does not exist", file);
        }
    }

    // 3. Load and concatenate, keeping per-sample row counts
    let mut mats = Vec::with_capacity(embed_files.len());
    for file in embed_files.iter() {
        let MatWithNames { mat, .. } = Mat::from_parquet(file)?;
        info!("{}: {} x {}", file, mat.nrows(), mat.ncols());
        mats.push(mat);
    }

    let sample_sizes: Vec<usize> = mats.iter().map(|m| m.nrows()).collect();
    let stacked = vstack(&mats)?;
    drop(mats);

    let total: usize = sample_sizes.iter().sum();
    if total != stacked.nrows() {
        anyhow::bail!(
            "per-sample row counts sum to {} but stacked matrix has {} rows",
            total,
            stacked.nrows()
        );
    }

    info!(
        "stacked embeddings: {} x {} over {} samples",
        stacked.nrows(),
        stacked.ncols(),
        sample_sizes.len()
    );

    // 4. One mixture per cluster count; slice labels back per sample
    for &k in args.k_list.iter() {
        let gmm = GaussianMixture::fit(
            &stacked,
            &GmmArgs {
                n_components: k,
                max_iter: args.max_iter,
                tol: args.tol,
                seed: args.seed,
                ..Default::default()
            },
        )?;
        let labels = gmm.predict(&stacked);

        let distinct: HashSet<usize> = labels.iter().copied().collect();
        if distinct.len() > k {
            anyhow::bail!("{} distinct labels from a {}-component mixture", distinct.len(), k);
        }
        info!(
            "k = {}: {} occupied components after {} EM iterations",
            k,
            distinct.len(),
            gmm.n_iter
        );

        let k_dir = format!("{}/gmm{}", out_dir, k);
        mkdir(&k_dir)?;

        let mut start = 0;
        for (sample, &size) in sample_names.iter().zip(sample_sizes.iter()) {
            let slice = &labels[start..start + size];
            write_types(slice, &format!("{}/{}_clusters.txt", k_dir, sample))?;
            start += size;
        }
    }

    info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(
        dir: &std::path::Path,
        sample: &str,
        nrows: usize,
        shift: f32,
    ) -> anyhow::Result<()> {
        std::fs::write(dir.join(format!("{}_node_meta.csv", sample)), "node\n")?;

        let mat = Mat::from_fn(nrows, 3, |i, j| shift + 0.01 * (i * 3 + j) as f32);
        let file = dir.join(format!("{}_50_embeddings.parquet", sample));
        mat.to_parquet(file.to_str().unwrap())?;
        Ok(())
    }

    fn test_args(dir: &str) -> ClusterArgs {
        ClusterArgs {
            dir: dir.into(),
            meta_suffix: "_node_meta.csv".into(),
            embed_suffix: "_50_embeddings.parquet".into(),
            k_list: vec![2, 3],
            max_iter: 50,
            tol: 1e-4,
            seed: 42,
            out: None,
            verbose: false,
        }
    }

    #[test]
    fn test_cluster_embeddings_slices_per_sample() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_sample(dir.path(), "regionB", 8, 10.0)?;
        write_sample(dir.path(), "regionA", 5, 0.0)?;

        let dir_str = dir.path().to_str().unwrap();
        cluster_embeddings(&test_args(dir_str))?;

        for k in [2usize, 3] {
            let a = read_lines(&format!("{}/gmm{}/regionA_clusters.txt", dir_str, k))?;
            let b = read_lines(&format!("{}/gmm{}/regionB_clusters.txt", dir_str, k))?;
            assert_eq!(a.len(), 5);
            assert_eq!(b.len(), 8);

            for label in a.iter().chain(b.iter()) {
                let label: usize = label.parse()?;
                assert!(label < k);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rerun_reproduces_labels() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_sample(dir.path(), "s1", 6, 0.0)?;
        write_sample(dir.path(), "s2", 7, 5.0)?;

        let dir_str = dir.path().to_str().unwrap();
        let args = ClusterArgs {
            k_list: vec![2],
            ..test_args(dir_str)
        };

        cluster_embeddings(&args)?;
        let first = read_lines(&format!("{}/gmm2/s1_clusters.txt", dir_str))?;

        cluster_embeddings(&args)?;
        let second = read_lines(&format!("{}/gmm2/s1_clusters.txt", dir_str))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_missing_embedding_file_fails_fast() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_sample(dir.path(), "good", 4, 0.0)?;
        std::fs::write(dir.path().join("orphan_node_meta.csv"), "node\n")?;

        let err = cluster_embeddings(&test_args(dir.path().to_str().unwrap()))
            .expect_err("orphan sample must fail");
        assert!(err.to_string().contains("orphan"));
        Ok(())
    }

    #[test]
    fn test_separated_samples_get_separated_labels() -> anyhow::Result<()> {
        // two samples sitting in distant regions of embedding space
        let dir = tempfile::tempdir()?;
        write_sample(dir.path(), "near", 10, 0.0)?;
        write_sample(dir.path(), "far", 10, 100.0)?;

        let dir_str = dir.path().to_str().unwrap();
        let args = ClusterArgs {
            k_list: vec![2],
            ..test_args(dir_str)
        };
        cluster_embeddings(&args)?;

        let near = read_lines(&format!("{}/gmm2/near_clusters.txt", dir_str))?;
        let far = read_lines(&format!("{}/gmm2/far_clusters.txt", dir_str))?;

        // within a sample one label, across samples different labels
        assert!(near.iter().all(|x| x == &near[0]));
        assert!(far.iter().all(|x| x == &far[0]));
        assert_ne!(near[0], far[0]);
        Ok(())
    }
}
