//! Neighborhood pyramid assembly
//!
//! Sampling runs on the CPU against the spatial graph; the sampled
//! index lists gather rows of the device-resident feature tensor.

use crate::common::*;
use candle_core::{Device, Tensor};
use candle_sage::sage::SageConfig;
use rand::Rng;

/// Sample fixed-size neighborhoods for `nodes` and gather their
/// feature rows into the hop tensors the encoder expects:
/// `hops[l]` has shape `(batch, hop_sizes[l], dim_input)`.
pub fn gather_hops<R: Rng>(
    graph: &NeighborGraph,
    features_nd: &Tensor,
    nodes: &[usize],
    config: &SageConfig,
    rng: &mut R,
    dev: &Device,
) -> anyhow::Result<Vec<Tensor>> {
    let batch = nodes.len();
    if batch == 0 {
        anyhow::bail!("empty node batch");
    }

    let mut levels: Vec<Vec<usize>> = vec![nodes.to_vec()];
    for &size in config.num_samples.iter() {
        let parents = levels.last().unwrap();
        let mut children = Vec::with_capacity(parents.len() * size);
        for &v in parents.iter() {
            children.extend(graph.sample_neighbors(v, size, rng));
        }
        levels.push(children);
    }

    levels
        .into_iter()
        .map(|ids| {
            let per_node = ids.len() / batch;
            let idx: Vec<u32> = ids.into_iter().map(|x| x as u32).collect();
            let idx = Tensor::from_vec(idx, (batch * per_node,), dev)?;
            let gathered = features_nd.index_select(&idx, 0)?;
            Ok(gathered.reshape((batch, per_node, config.dim_input))?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gather_hops_shapes() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let graph = NeighborGraph::from_edge_list(
            6,
            &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 0)],
            None,
        )?;

        let features = Mat::from_fn(6, 3, |i, j| (i * 3 + j) as f32);
        let features_nd = mat_to_tensor(&features, &dev)?;

        let config = candle_sage::sage::SageConfig {
            dim_input: 3,
            layer_dims: vec![4, 4],
            num_samples: vec![5, 2],
            use_bias: true,
        };

        let mut rng = StdRng::seed_from_u64(0);
        let hops = gather_hops(&graph, &features_nd, &[0, 2, 4], &config, &mut rng, &dev)?;

        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0].dims(), &[3, 1, 3]);
        assert_eq!(hops[1].dims(), &[3, 5, 3]);
        assert_eq!(hops[2].dims(), &[3, 10, 3]);

        // level 0 must be the nodes' own features
        let own: Vec<f32> = hops[0].flatten_all()?.to_vec1()?;
        assert_eq!(own[0..3], [0.0, 1.0, 2.0]);
        assert_eq!(own[3..6], [6.0, 7.0, 8.0]);
        Ok(())
    }
}
