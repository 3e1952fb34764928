use candle_core::{Result, Tensor};

/// KL divergence between `N(mu, sigma^2)` and the standard normal
///
/// 0.5 * sum (sigma^2 - 1 + mu^2 - log(sigma^2))
///
/// * `z_mean` - posterior mean
/// * `z_lnvar` - posterior log variance
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Logistic (binary cross-entropy) loss on raw link scores
///
/// loss(i) = max(s, 0) - s * y + log(1 + exp(-|s|))
///
/// * `scores` - inner-product link scores (n)
/// * `labels` - 1 for observed pairs, 0 for sampled pairs (n)
pub fn link_logit_loss(scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let zeros = scores.zeros_like()?;
    let pos = scores.maximum(&zeros)?;
    let log1p = (scores.abs()?.neg()?.exp()? + 1.0)?.log()?;
    (pos - scores.mul(labels)?)? + log1p
}

/// Fast lgamma approximation (Paul Mineiro's fastlgamma)
///
/// ```text
/// lgamma(x) ≈ -2.081061466 - x + 0.0833333/(x+3) - log(x*(1+x)*(2+x)) + (2.5+x)*log(x+3)
/// ```
pub fn lgamma_approx(x: &Tensor) -> Result<Tensor> {
    let x_safe = x.clamp(1e-6f32, f32::MAX)?;

    let x_plus_1 = (&x_safe + 1.0)?;
    let x_plus_2 = (&x_safe + 2.0)?;
    let logterm = ((&x_safe * &x_plus_1)? * &x_plus_2)?.log()?;

    let xp3 = (&x_safe + 3.0)?;
    let log_xp3 = xp3.log()?;

    let recip_term = (xp3.recip()? * 0.0833333)?;
    let mult_term = ((&x_safe + 2.5)? * &log_xp3)?;

    (((recip_term - 2.081061466)? - &x_safe)? - &logterm)? + &mult_term
}

/// Negative Binomial log-likelihood of count data, summed per row
///
/// Parameterization: mu = exp(log_mu) mean, r = exp(log_r) dispersion,
/// Var(y) = mu + mu^2/r.
///
/// ```text
/// log P(y | mu, r) = lgamma(y + r) - lgamma(r) - lgamma(y + 1)
///                  + r*log(r) + y*log(mu) - (r + y)*log(r + mu)
/// ```
///
/// * `x_nd` - observed counts (n x d)
/// * `log_mu_nd` - log mean (n x d)
/// * `log_r_d` - gene-wise log dispersion (d), broadcast over rows
pub fn negbinom_llik(x_nd: &Tensor, log_mu_nd: &Tensor, log_r_d: &Tensor) -> Result<Tensor> {
    let log_mu = log_mu_nd.clamp(-15.0, 15.0)?;
    let log_r = log_r_d.clamp(-15.0, 15.0)?;

    let mu = log_mu.exp()?;
    let r = log_r.exp()?;

    let y_plus_r = x_nd.broadcast_add(&r)?;
    let r_plus_mu = mu.broadcast_add(&r)?;

    let lgamma_y_plus_r = lgamma_approx(&y_plus_r)?;
    let lgamma_r = lgamma_approx(&r)?;
    let lgamma_y_plus_1 = lgamma_approx(&(x_nd + 1.0)?)?;

    let r_log_r = (&r * &log_r)?;
    let y_log_mu = x_nd.mul(&log_mu)?;
    let r_plus_y_log_r_plus_mu = (&y_plus_r * r_plus_mu.log()?)?;

    let log_prob = lgamma_y_plus_r
        .broadcast_sub(&lgamma_r)?
        .sub(&lgamma_y_plus_1)?
        .broadcast_add(&r_log_r)?
        .add(&y_log_mu)?
        .sub(&r_plus_y_log_r_plus_mu)?;

    log_prob.sum(log_prob.rank() - 1)
}
