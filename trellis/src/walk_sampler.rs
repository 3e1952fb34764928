//! Unsupervised node-pair sampling for link-prediction training
//!
//! Each epoch runs `num_walks` uniform random walks from every seed
//! root; every (root, visited) pair is a positive example, matched by
//! one negative example whose tail is drawn from the degree^0.75
//! unigram distribution over all nodes.

use crate::common::*;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::prelude::SliceRandom;
use rand::Rng;

pub struct WalkSamplerArgs {
    pub num_walks: usize,
    pub walk_length: usize,
}

pub struct UnsupervisedWalkSampler<'a> {
    graph: &'a NeighborGraph,
    roots: Vec<usize>,
    args: WalkSamplerArgs,
    negative_tails: WeightedIndex<f64>,
}

impl<'a> UnsupervisedWalkSampler<'a> {
    pub fn new(
        graph: &'a NeighborGraph,
        roots: Vec<usize>,
        args: WalkSamplerArgs,
    ) -> anyhow::Result<Self> {
        if roots.is_empty() {
            anyhow::bail!("no walk roots");
        }
        if args.num_walks == 0 || args.walk_length < 2 {
            anyhow::bail!(
                "need at least one walk of length >= 2, got {} x {}",
                args.num_walks,
                args.walk_length
            );
        }
        for &r in roots.iter() {
            if r >= graph.num_nodes() {
                anyhow::bail!("root {} outside the graph", r);
            }
        }

        let weights: Vec<f64> = (0..graph.num_nodes())
            .map(|v| (graph.degree(v) as f64).powf(0.75))
            .collect();
        let negative_tails = WeightedIndex::new(&weights)
            .map_err(|e| anyhow::anyhow!("degree distribution: {}", e))?;

        Ok(Self {
            graph,
            roots,
            args,
            negative_tails,
        })
    }

    /// One epoch of shuffled `(head, tail, label)` examples; labels
    /// are 1.0 for walk co-occurrences and 0.0 for sampled tails.
    pub fn epoch_pairs<R: Rng>(&self, rng: &mut R) -> Vec<(usize, usize, f32)> {
        let mut pairs = vec![];

        for &root in self.roots.iter() {
            for _ in 0..self.args.num_walks {
                let walk = self.graph.random_walk(root, self.args.walk_length, rng);
                for &context in walk.iter().skip(1) {
                    pairs.push((root, context, 1.0));
                    pairs.push((root, self.negative_tails.sample(rng), 0.0));
                }
            }
        }

        pairs.shuffle(rng);
        pairs
    }

    pub fn pairs_per_epoch(&self) -> usize {
        2 * self.roots.len() * self.args.num_walks * (self.args.walk_length - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ring_graph(n: usize) -> NeighborGraph {
        let edges: Vec<(usize, usize)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        NeighborGraph::from_edge_list(n, &edges, None).unwrap()
    }

    #[test]
    fn test_epoch_pairs_valid() -> anyhow::Result<()> {
        let graph = ring_graph(8);
        let sampler = UnsupervisedWalkSampler::new(
            &graph,
            vec![0, 3, 5],
            WalkSamplerArgs {
                num_walks: 2,
                walk_length: 4,
            },
        )?;

        let mut rng = StdRng::seed_from_u64(11);
        let pairs = sampler.epoch_pairs(&mut rng);

        // 3 roots x 2 walks x 3 contexts, positives and negatives
        assert_eq!(pairs.len(), sampler.pairs_per_epoch());
        assert_eq!(pairs.len(), 36);

        let n_pos = pairs.iter().filter(|&&(_, _, y)| y == 1.0).count();
        assert_eq!(n_pos, 18);

        for &(head, tail, label) in pairs.iter() {
            assert!(head < 8 && tail < 8);
            assert!(label == 0.0 || label == 1.0);
            assert!([0, 3, 5].contains(&head));
        }
        Ok(())
    }

    #[test]
    fn test_positive_pairs_reachable() -> anyhow::Result<()> {
        // on a ring, a walk of length 3 stays within 2 hops of the root
        let graph = ring_graph(10);
        let sampler = UnsupervisedWalkSampler::new(
            &graph,
            vec![0],
            WalkSamplerArgs {
                num_walks: 5,
                walk_length: 3,
            },
        )?;

        let mut rng = StdRng::seed_from_u64(3);
        for (head, tail, label) in sampler.epoch_pairs(&mut rng) {
            if label == 1.0 {
                let hop_dist = (tail as i64 - head as i64).rem_euclid(10).min(
                    (head as i64 - tail as i64).rem_euclid(10),
                );
                assert!(hop_dist <= 2, "positive pair ({}, {}) too far", head, tail);
            }
        }
        Ok(())
    }

    #[test]
    fn test_bad_arguments_rejected() {
        let graph = ring_graph(4);
        assert!(UnsupervisedWalkSampler::new(
            &graph,
            vec![],
            WalkSamplerArgs {
                num_walks: 1,
                walk_length: 2
            }
        )
        .is_err());
        assert!(UnsupervisedWalkSampler::new(
            &graph,
            vec![9],
            WalkSamplerArgs {
                num_walks: 1,
                walk_length: 2
            }
        )
        .is_err());
        assert!(UnsupervisedWalkSampler::new(
            &graph,
            vec![0],
            WalkSamplerArgs {
                num_walks: 1,
                walk_length: 1
            }
        )
        .is_err());
    }
}
