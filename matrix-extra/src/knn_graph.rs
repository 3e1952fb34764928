//! Undirected neighborhood graphs
//!
//! Built either from point coordinates (approximate kNN over an HNSW
//! index) or from a persisted edge list. Serves both the spatial
//! graphs consumed by the embedding trainer (neighbor sampling,
//! random walks) and the latent-space graphs behind the 2D layout
//! (fuzzy kernel weights).

use crate::utils::create_jobs;

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rand::Rng;
use rayon::prelude::*;

type Mat = DMatrix<f32>;

pub struct NeighborGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes)
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances/weights, parallel to `edges`
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i);
    /// otherwise keep union edges with the min distance.
    pub reciprocal: bool,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 10,
            block_size: 1000,
            reciprocal: false,
        }
    }
}

#[derive(Clone)]
struct EuclidPoint(Vec<f32>);

impl instant_distance::Point for EuclidPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl NeighborGraph {
    /// Build a kNN graph where each row of `data` is a point.
    pub fn from_rows(data: &Mat, args: KnnGraphArgs) -> anyhow::Result<NeighborGraph> {
        let nn = data.nrows();
        let points: Vec<EuclidPoint> = (0..nn)
            .map(|i| EuclidPoint(data.row(i).iter().copied().collect()))
            .collect();
        Self::build_from_points(points, args)
    }

    /// Build a kNN graph where each column of `points` is a point.
    pub fn from_columns(points: &Mat, args: KnnGraphArgs) -> anyhow::Result<NeighborGraph> {
        let nn = points.ncols();
        let points: Vec<EuclidPoint> = (0..nn)
            .map(|j| EuclidPoint(points.column(j).iter().copied().collect()))
            .collect();
        Self::build_from_points(points, args)
    }

    /// Build from a persisted edge list; indices are canonicalized to
    /// `i < j`, deduplicated, self-loops dropped.
    pub fn from_edge_list(
        n_nodes: usize,
        edge_list: &[(usize, usize)],
        weights: Option<&[f32]>,
    ) -> anyhow::Result<NeighborGraph> {
        if let Some(w) = weights {
            if w.len() != edge_list.len() {
                anyhow::bail!("{} weights for {} edges", w.len(), edge_list.len());
            }
        }

        let mut edges: Vec<((usize, usize), f32)> = edge_list
            .iter()
            .enumerate()
            .filter(|(_, &(i, j))| i != j)
            .map(|(e, &(i, j))| -> anyhow::Result<((usize, usize), f32)> {
                if i >= n_nodes || j >= n_nodes {
                    anyhow::bail!("edge ({}, {}) out of range for {} nodes", i, j, n_nodes);
                }
                let w = weights.map(|w| w[e]).unwrap_or(1.0);
                Ok(((i.min(j), i.max(j)), w))
            })
            .collect::<anyhow::Result<_>>()?;

        edges.sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        if edges.is_empty() {
            anyhow::bail!("empty edge list");
        }

        Self::assemble(n_nodes, edges)
    }

    fn build_from_points(
        points: Vec<EuclidPoint>,
        args: KnnGraphArgs,
    ) -> anyhow::Result<NeighborGraph> {
        let nn = points.len();
        let nquery = (args.knn + 1).min(nn).max(2);

        let index =
            instant_distance::Builder::default().build(points.clone(), (0..nn).collect::<Vec<_>>());

        let jobs = create_jobs(nn, Some(args.block_size));
        let njobs = jobs.len() as u64;

        /////////////////////////////////////////
        // step 1: per-point nearest neighbors //
        /////////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter()
            .progress_count(njobs)
            .for_each(|(lb, ub)| {
                let mut search = instant_distance::Search::default();
                for i in lb..ub {
                    for item in index.search(&points[i], &mut search).take(nquery) {
                        let j = *item.value;
                        if j != i {
                            triplets.insert((i, j), item.distance);
                        }
                    }
                }
            });

        info!("{} directed pairs by kNN matching", triplets.len());

        if triplets.is_empty() {
            return Err(anyhow::anyhow!("empty triplets"));
        }

        //////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        //////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = if args.reciprocal {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j && triplets.contains_key(&(j, i)) {
                        Some(((i, j), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j {
                        let d_ij = *entry.value();
                        let d_ji = triplets.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                        Some(((i, j), d_ij.min(d_ji)))
                    } else if i > j && !triplets.contains_key(&(j, i)) {
                        Some(((j, i), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup();

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal { "reciprocal" } else { "union" }
        );

        Self::assemble(nn, edges)
    }

    fn assemble(
        n_nodes: usize,
        edges: Vec<((usize, usize), f32)>,
    ) -> anyhow::Result<NeighborGraph> {
        let mut coo = CooMatrix::new(n_nodes, n_nodes);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }
        let adjacency = CscMatrix::from(&coo);

        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        Ok(NeighborGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes,
        })
    }

    /// Neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    pub fn degree(&self, node: usize) -> usize {
        self.neighbors(node).len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Fixed-size neighbor sample with replacement; an isolated node
    /// falls back to itself so downstream tensor shapes stay fixed.
    pub fn sample_neighbors<R: Rng>(&self, node: usize, size: usize, rng: &mut R) -> Vec<usize> {
        let hood = self.neighbors(node);
        if hood.is_empty() {
            return vec![node; size];
        }
        (0..size)
            .map(|_| hood[rng.random_range(0..hood.len())])
            .collect()
    }

    /// Uniform random walk starting at `start`, including the start
    /// node; stops early only when the walk reaches an isolated node.
    pub fn random_walk<R: Rng>(&self, start: usize, length: usize, rng: &mut R) -> Vec<usize> {
        let mut walk = Vec::with_capacity(length);
        walk.push(start);
        let mut here = start;
        while walk.len() < length {
            let hood = self.neighbors(here);
            if hood.is_empty() {
                break;
            }
            here = hood[rng.random_range(0..hood.len())];
            walk.push(here);
        }
        walk
    }

    /// Per-point bandwidth kernel weights with fuzzy-union
    /// symmetrization; all in (0, 1], parallel to `edges`.
    pub fn fuzzy_kernel_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }

        let offsets = self.adjacency.col_offsets();
        let values = self.adjacency.values();

        // rho = distance to nearest neighbor,
        // sigma calibrated so sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
        let (rho, sigma): (Vec<f32>, Vec<f32>) = (0..self.n_nodes)
            .into_par_iter()
            .map(|i| {
                let dists = &values[offsets[i]..offsets[i + 1]];
                if dists.is_empty() {
                    return (0.0, 1.0);
                }
                let rho_i = dists.iter().cloned().fold(f32::INFINITY, f32::min);
                let target = (dists.len() as f32).log2();
                (rho_i, smooth_knn_sigma(dists, rho_i, target))
            })
            .unzip();

        self.edges
            .iter()
            .zip(self.distances.iter())
            .map(|(&(i, j), &d)| {
                let w_ij = membership_weight(d, rho[i], sigma[i]);
                let w_ji = membership_weight(d, rho[j], sigma[j]);
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }
}

/// Binary search for the per-point bandwidth:
/// sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = 1e-3 * mean_dist;

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    mid.max(min_sigma)
}

fn membership_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}
