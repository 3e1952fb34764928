//! Conditional variational autoencoder modules for count data
//!
//! The encoder maps log1p-transformed counts (plus an optional batch
//! one-hot) to a Gaussian latent posterior; the decoder reconstructs
//! counts through a softmax gene program scaled by the observed
//! library size, with gene-wise negative-binomial dispersion.

use crate::aux_layers::StackLayers;
use crate::loss::{gaussian_kl_loss, negbinom_llik};
use crate::model_traits::{DecoderModuleT, EncoderModuleT};

use candle_core::{Result, Tensor};
use candle_nn::{ops, BatchNorm, Linear, Module, ModuleT, VarBuilder};

pub struct GaussianEncoderArgs<'a> {
    pub n_features: usize,
    pub n_covariates: usize,
    pub n_latent: usize,
    pub layers: &'a [usize],
}

pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    bn_z: BatchNorm,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl GaussianEncoder {
    pub fn new(args: GaussianEncoderArgs, vs: VarBuilder) -> Result<Self> {
        if args.layers.is_empty() {
            candle_core::bail!("encoder needs at least one hidden layer");
        }

        let bn_config = candle_nn::BatchNormConfig {
            eps: 1e-4,
            remove_mean: true,
            affine: true,
            momentum: 0.1,
        };

        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = args.n_features + args.n_covariates;
        for (j, &next_dim) in args.layers.iter().enumerate() {
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(format!("nn.enc.fc.{}", j)))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }

        let bn_z = candle_nn::batch_norm(prev_dim, bn_config, vs.pp("nn.enc.bn_z"))?;
        let z_mean = candle_nn::linear(prev_dim, args.n_latent, vs.pp("nn.enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(prev_dim, args.n_latent, vs.pp("nn.enc.z.lnvar"))?;

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            fc,
            bn_z,
            z_mean,
            z_lnvar,
        })
    }

    /// z = mu + sigma * eps with eps ~ N(0, 1); deterministic in eval
    fn reparameterize(&self, z_mean: &Tensor, z_lnvar: &Tensor, train: bool) -> Result<Tensor> {
        if train {
            let eps = Tensor::randn_like(z_mean, 0., 1.)?;
            z_mean + (z_lnvar * 0.5)?.exp()? * eps
        } else {
            Ok(z_mean.clone())
        }
    }
}

impl EncoderModuleT for GaussianEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        covar_nb: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let min_mean = -(self.n_features as f64).sqrt(); // stabilize
        let max_mean = (self.n_features as f64).sqrt(); // mean
        let min_lv = -8.; // and log variance
        let max_lv = 8.;

        let h_nd = (x_nd + 1.)?.log()?;
        let h_nd = match covar_nb {
            Some(covar) => Tensor::cat(&[&h_nd, covar], 1)?,
            None => h_nd,
        };

        let fc_nl = self.fc.forward(&h_nd)?;
        let bn_nl = self.bn_z.forward_t(&fc_nl, train)?;

        let z_mean_nk = self
            .z_mean
            .forward(&bn_nl)?
            .clamp(min_mean, max_mean)?;
        let z_lnvar_nk = self.z_lnvar.forward(&bn_nl)?.clamp(min_lv, max_lv)?;

        let z_nk = self.reparameterize(&z_mean_nk, &z_lnvar_nk, train)?;
        Ok((z_nk, gaussian_kl_loss(&z_mean_nk, &z_lnvar_nk)?))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

pub struct NbDecoderArgs<'a> {
    pub n_genes: usize,
    pub n_covariates: usize,
    pub n_latent: usize,
    pub layers: &'a [usize],
}

pub struct NbDecoder {
    n_genes: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    px_logit: Linear,
    log_disp: Tensor,
}

impl NbDecoder {
    pub fn new(args: NbDecoderArgs, vs: VarBuilder) -> Result<Self> {
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = args.n_latent + args.n_covariates;
        for (j, &next_dim) in args.layers.iter().enumerate() {
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(format!("nn.dec.fc.{}", j)))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }

        let px_logit = candle_nn::linear(prev_dim, args.n_genes, vs.pp("nn.dec.px"))?;
        let log_disp = vs.get_with_hints(args.n_genes, "nn.dec.log_disp", candle_nn::init::ZERO)?;

        Ok(Self {
            n_genes: args.n_genes,
            n_latent: args.n_latent,
            fc,
            px_logit,
            log_disp,
        })
    }

    /// Log of the reconstruction mean: log_softmax gene program plus
    /// the observed per-cell log library size.
    fn log_mean(&self, z_nk: &Tensor, covar_nb: Option<&Tensor>, x_nd: &Tensor) -> Result<Tensor> {
        let h_nk = match covar_nb {
            Some(covar) => Tensor::cat(&[z_nk, covar], 1)?,
            None => z_nk.clone(),
        };
        let h_nk = if self.fc.is_empty() {
            h_nk
        } else {
            self.fc.forward(&h_nk)?
        };

        let log_px_nd = ops::log_softmax(&self.px_logit.forward(&h_nk)?, 1)?;
        let log_library_n1 = x_nd.sum_keepdim(1)?.clamp(1.0, f32::MAX)?.log()?;
        log_px_nd.broadcast_add(&log_library_n1)
    }
}

impl DecoderModuleT for NbDecoder {
    fn forward(&self, z_nk: &Tensor, covar_nb: Option<&Tensor>, x_nd: &Tensor) -> Result<Tensor> {
        self.log_mean(z_nk, covar_nb, x_nd)?.exp()
    }

    fn forward_with_llik(
        &self,
        z_nk: &Tensor,
        covar_nb: Option<&Tensor>,
        x_nd: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let log_mu_nd = self.log_mean(z_nk, covar_nb, x_nd)?;
        let llik_n = negbinom_llik(x_nd, &log_mu_nd, &self.log_disp)?;
        Ok((log_mu_nd.exp()?, llik_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_genes
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
