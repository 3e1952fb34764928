use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// Amortized posterior inference
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `covar_nb` - optional conditioning covariate, e.g. batch one-hot (n x b)
    /// * `train` - stochastic (reparameterized) vs deterministic output
    ///
    /// # Returns `(z_nk, kl_n)`
    /// * `z_nk` - latent representation (n x k)
    /// * `kl_n` - per-row KL loss (n)
    fn forward_t(
        &self,
        x_nd: &Tensor,
        covar_nb: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// Reconstruction mean given latent states
    fn forward(&self, z_nk: &Tensor, covar_nb: Option<&Tensor>, x_nd: &Tensor) -> Result<Tensor>;

    /// Reconstruction and per-row log-likelihood against observed data
    ///
    /// * `z_nk` - latent states
    /// * `covar_nb` - optional conditioning covariate
    /// * `x_nd` - observed data to validate with
    fn forward_with_llik(
        &self,
        z_nk: &Tensor,
        covar_nb: Option<&Tensor>,
        x_nd: &Tensor,
    ) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
