//! GraphSAGE encoder with attentional neighborhood aggregation
//!
//! The encoder consumes a sampled neighborhood pyramid: `hops[0]` holds
//! the batch nodes themselves `(B, 1, d)`, `hops[l]` the flattened
//! l-hop neighbor samples `(B, s_1*...*s_l, d)`. Each stage collapses
//! the deepest level into its parents with a shared attention
//! aggregator until a single `(B, d_out)` embedding remains, which is
//! L2-normalized. Link scores are plain inner products, so the link
//! head carries no parameters of its own.

use candle_core::{Result, Tensor, D};
use candle_nn::{ops, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SageConfig {
    /// Input feature dimension per node
    pub dim_input: usize,
    /// Output dimension of each aggregation layer
    pub layer_dims: Vec<usize>,
    /// Neighbor sample size per layer, parallel to `layer_dims`
    pub num_samples: Vec<usize>,
    pub use_bias: bool,
}

impl SageConfig {
    /// Row counts of the neighborhood pyramid: `[1, s_1, s_1*s_2, ...]`
    pub fn hop_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![1];
        for &s in self.num_samples.iter() {
            sizes.push(sizes.last().unwrap() * s);
        }
        sizes
    }

    pub fn dim_embedding(&self) -> usize {
        *self.layer_dims.last().unwrap_or(&0)
    }

    pub fn to_json_file(&self, file_path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(file_path, json)?;
        Ok(())
    }

    pub fn from_json_file(file_path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(file_path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// GAT-style attention over a parent node and its sampled neighbors
///
/// e_ij = LeakyReLU(a_self . W h_i + a_neigh . W h_j), softmax over
/// {i} and the sampled j, output = sum_j alpha_ij W h_j (+ bias).
pub struct AttentionalAggregator {
    proj: Linear,
    attn_self: Tensor,
    attn_neigh: Tensor,
    bias: Option<Tensor>,
}

impl AttentionalAggregator {
    pub fn new(d_in: usize, d_out: usize, use_bias: bool, vs: VarBuilder) -> Result<Self> {
        let init = candle_nn::init::DEFAULT_KAIMING_NORMAL;

        let proj = candle_nn::linear_no_bias(d_in, d_out, vs.pp("proj"))?;
        let attn_self = vs.get_with_hints(d_out, "attn.self", init)?;
        let attn_neigh = vs.get_with_hints(d_out, "attn.neigh", init)?;

        let bias = if use_bias {
            Some(vs.get_with_hints(d_out, "bias", candle_nn::init::ZERO)?)
        } else {
            None
        };

        Ok(Self {
            proj,
            attn_self,
            attn_neigh,
            bias,
        })
    }

    /// * `self_bnd` - parent features (B, n, d_in)
    /// * `neigh_bnkd` - sampled neighbor features (B, n, k, d_in)
    pub fn forward(&self, self_bnd: &Tensor, neigh_bnkd: &Tensor) -> Result<Tensor> {
        let hs = self.proj.forward(self_bnd)?; // (B, n, d_out)
        let hn = self.proj.forward(neigh_bnkd)?; // (B, n, k, d_out)

        let score_self = hs.broadcast_mul(&self.attn_self)?.sum_keepdim(D::Minus1)?; // (B, n, 1)
        let tail_self = hs.broadcast_mul(&self.attn_neigh)?.sum_keepdim(D::Minus1)?; // (B, n, 1)
        let tail_neigh = hn.broadcast_mul(&self.attn_neigh)?.sum(D::Minus1)?; // (B, n, k)

        let scores = Tensor::cat(&[&tail_self, &tail_neigh], D::Minus1)?
            .broadcast_add(&score_self)?;
        let scores = leaky_relu(&scores, 0.2)?;
        let alpha = ops::softmax(&scores, D::Minus1)?; // (B, n, k+1)

        let values = Tensor::cat(&[&hs.unsqueeze(2)?, &hn], 2)?; // (B, n, k+1, d_out)
        let mut out = values
            .broadcast_mul(&alpha.unsqueeze(D::Minus1)?)?
            .sum(2)?; // (B, n, d_out)

        if let Some(bias) = &self.bias {
            out = out.broadcast_add(bias)?;
        }
        Ok(out)
    }
}

fn leaky_relu(x: &Tensor, slope: f64) -> Result<Tensor> {
    x.maximum(&(x * slope)?)
}

pub struct GraphSageEncoder {
    config: SageConfig,
    layers: Vec<AttentionalAggregator>,
}

impl GraphSageEncoder {
    pub fn new(config: SageConfig, vs: VarBuilder) -> Result<Self> {
        if config.layer_dims.is_empty() || config.layer_dims.len() != config.num_samples.len() {
            candle_core::bail!(
                "layer_dims ({:?}) and num_samples ({:?}) must be non-empty and parallel",
                config.layer_dims,
                config.num_samples
            );
        }

        let mut layers = Vec::with_capacity(config.layer_dims.len());
        let mut d_prev = config.dim_input;
        for (l, &d_next) in config.layer_dims.iter().enumerate() {
            layers.push(AttentionalAggregator::new(
                d_prev,
                d_next,
                config.use_bias,
                vs.pp(format!("sage.layer.{}", l)),
            )?);
            d_prev = d_next;
        }

        Ok(Self { config, layers })
    }

    pub fn config(&self) -> &SageConfig {
        &self.config
    }

    pub fn dim_embedding(&self) -> usize {
        self.config.dim_embedding()
    }

    /// Collapse a sampled neighborhood pyramid into node embeddings
    ///
    /// * `hops` - `hops[l]` of shape `(B, hop_sizes[l], dim_input)`
    ///
    /// Returns L2-normalized embeddings `(B, dim_embedding)`.
    pub fn forward(&self, hops: &[Tensor]) -> Result<Tensor> {
        let n_layers = self.layers.len();
        if hops.len() != n_layers + 1 {
            candle_core::bail!("expected {} hop tensors, got {}", n_layers + 1, hops.len());
        }

        let mut levels: Vec<Tensor> = hops.to_vec();

        for (stage, layer) in self.layers.iter().enumerate() {
            let mut next = Vec::with_capacity(levels.len() - 1);
            for i in 0..(levels.len() - 1) {
                let (b, n_parent, d) = levels[i].dims3()?;
                let k = self.config.num_samples[i];
                let child = levels[i + 1].reshape((b, n_parent, k, d))?;

                let mut agg = layer.forward(&levels[i], &child)?;
                if stage + 1 < n_layers {
                    agg = agg.relu()?;
                }
                next.push(agg);
            }
            levels = next;
        }

        let z = levels
            .pop()
            .ok_or_else(|| candle_core::Error::Msg("empty pyramid".into()))?
            .squeeze(1)?;

        let norm = (z.sqr()?.sum_keepdim(D::Minus1)?.sqrt()? + 1e-12)?;
        z.broadcast_div(&norm)
    }
}

/// Parameter-free inner-product link scoring
pub struct LinkPredictionHead;

impl LinkPredictionHead {
    /// * `src_bd`, `dst_bd` - embeddings of the pair endpoints (B, d)
    ///
    /// Returns raw scores (B); feed to the logistic link loss.
    pub fn score(src_bd: &Tensor, dst_bd: &Tensor) -> Result<Tensor> {
        src_bd.mul(dst_bd)?.sum(D::Minus1)
    }
}
