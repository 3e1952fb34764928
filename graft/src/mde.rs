//! Minimum-distortion 2D embedding of latent representations
//!
//! Neighborhood structure comes from a kNN graph with fuzzy kernel
//! edge weights; coordinates start at the top two principal
//! components and are refined by attraction along weighted edges with
//! sampled-pair repulsion. Deterministic for a fixed seed.

use crate::common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct MdeArgs {
    pub knn: usize,
    pub n_iter: usize,
    /// Repulsion samples per edge per iteration
    pub n_negatives: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for MdeArgs {
    fn default() -> Self {
        Self {
            knn: 15,
            n_iter: 500,
            n_negatives: 5,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

pub fn mde_embed(latent: &Mat, args: &MdeArgs) -> anyhow::Result<Mat> {
    let nn = latent.nrows();
    if nn < 3 {
        anyhow::bail!("need at least 3 rows for a 2D layout, got {}", nn);
    }

    let z = latent.scale_columns();
    let graph = NeighborGraph::from_rows(
        &z,
        KnnGraphArgs {
            knn: args.knn.min(nn - 1).max(1),
            reciprocal: false,
            ..Default::default()
        },
    )?;
    let weights = graph.fuzzy_kernel_weights();

    info!(
        "layout graph: {} nodes, {} edges",
        graph.num_nodes(),
        graph.num_edges()
    );

    let mut coords = pca_2d(&z);
    normalize_spread(&mut coords);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let eps = 0.01f32;

    for it in 0..args.n_iter {
        // linear learning-rate decay with a small floor
        let lr = args.learning_rate * (1.0 - it as f32 / args.n_iter.max(1) as f32).max(0.01);

        for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
            // attraction along the weighted edge
            let dx = coords[(i, 0)] - coords[(j, 0)];
            let dy = coords[(i, 1)] - coords[(j, 1)];
            let pull = lr * w;
            coords[(i, 0)] -= pull * dx;
            coords[(i, 1)] -= pull * dy;
            coords[(j, 0)] += pull * dx;
            coords[(j, 1)] += pull * dy;

            // repulsion against sampled non-neighbors
            for _ in 0..args.n_negatives {
                let r = rng.random_range(0..nn);
                if r == i || r == j {
                    continue;
                }
                let dx = coords[(i, 0)] - coords[(r, 0)];
                let dy = coords[(i, 1)] - coords[(r, 1)];
                let d2 = dx * dx + dy * dy + eps;
                let push = (lr / (d2 * (1.0 + d2))).min(lr * 4.0);
                coords[(i, 0)] += push * dx;
                coords[(i, 1)] += push * dy;
            }
        }
    }

    // re-center
    let mean_x = coords.column(0).sum() / nn as f32;
    let mean_y = coords.column(1).sum() / nn as f32;
    for i in 0..nn {
        coords[(i, 0)] -= mean_x;
        coords[(i, 1)] -= mean_y;
    }

    Ok(coords)
}

/// Top-2 principal component projection as layout initialization
fn pca_2d(z: &Mat) -> Mat {
    let nn = z.nrows();
    let centered = z.centre_columns();

    if z.ncols() < 2 {
        let mut coords = Mat::zeros(nn, 2);
        coords.column_mut(0).copy_from(&centered.column(0));
        return coords;
    }

    let cov = centered.transpose() * &centered;
    let eig = cov.symmetric_eigen();

    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut coords = Mat::zeros(nn, 2);
    coords
        .column_mut(0)
        .copy_from(&(&centered * eig.eigenvectors.column(order[0])));
    coords
        .column_mut(1)
        .copy_from(&(&centered * eig.eigenvectors.column(order[1])));
    coords
}

/// Scale coordinates to unit standard deviation per axis
fn normalize_spread(coords: &mut Mat) {
    let nn = coords.nrows().max(1) as f32;
    for mut col in coords.column_iter_mut() {
        let mu = col.sum() / nn;
        col.add_scalar_mut(-mu);
        let sd = (col.norm_squared() / nn).sqrt();
        if sd > 1e-8 {
            col.scale_mut(1.0 / sd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well-separated blobs in 5D latent space
    fn two_blob_latent() -> Mat {
        let mut rows = vec![];
        for i in 0..12 {
            let jitter = 0.05 * (i as f32);
            rows.extend([jitter, 0.1 - jitter, 0.0, jitter, 0.0]);
        }
        for i in 0..12 {
            let jitter = 0.05 * (i as f32);
            rows.extend([6.0 + jitter, 6.1 - jitter, 6.0, 6.0 + jitter, 6.0]);
        }
        Mat::from_row_slice(24, 5, &rows)
    }

    #[test]
    fn test_mde_shape_and_finiteness() -> anyhow::Result<()> {
        let latent = two_blob_latent();
        let coords = mde_embed(
            &latent,
            &MdeArgs {
                n_iter: 50,
                ..Default::default()
            },
        )?;

        assert_eq!(coords.nrows(), 24);
        assert_eq!(coords.ncols(), 2);
        for v in coords.iter() {
            assert!(v.is_finite());
        }
        Ok(())
    }

    #[test]
    fn test_mde_preserves_cluster_separation() -> anyhow::Result<()> {
        let latent = two_blob_latent();
        let coords = mde_embed(
            &latent,
            &MdeArgs {
                n_iter: 100,
                ..Default::default()
            },
        )?;

        let centroid = |range: std::ops::Range<usize>| -> (f32, f32) {
            let len = range.len() as f32;
            let (mut cx, mut cy) = (0.0, 0.0);
            for i in range {
                cx += coords[(i, 0)];
                cy += coords[(i, 1)];
            }
            (cx / len, cy / len)
        };

        let (ax, ay) = centroid(0..12);
        let (bx, by) = centroid(12..24);
        let between = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();

        let spread = |range: std::ops::Range<usize>, cx: f32, cy: f32| -> f32 {
            let len = range.len() as f32;
            range
                .map(|i| {
                    ((coords[(i, 0)] - cx).powi(2) + (coords[(i, 1)] - cy).powi(2)).sqrt()
                })
                .sum::<f32>()
                / len
        };

        let within = spread(0..12, ax, ay).max(spread(12..24, bx, by));
        assert!(
            between > within,
            "blobs collapsed: between {} vs within {}",
            between,
            within
        );
        Ok(())
    }

    #[test]
    fn test_mde_seed_determinism() -> anyhow::Result<()> {
        let latent = two_blob_latent();
        let args = MdeArgs {
            n_iter: 30,
            ..Default::default()
        };
        let a = mde_embed(&latent, &args)?;
        let b = mde_embed(&latent, &args)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_mde_rejects_tiny_input() {
        let latent = Mat::zeros(2, 3);
        assert!(mde_embed(&latent, &MdeArgs::default()).is_err());
    }
}
