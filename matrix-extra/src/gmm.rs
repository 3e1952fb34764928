//! Diagonal-covariance Gaussian mixture model
//!
//! K-means++ seeding followed by EM with log-sum-exp
//! responsibilities. Deterministic for a fixed seed.

use crate::utils::create_jobs;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

type Mat = DMatrix<f32>;

const VAR_FLOOR: f64 = 1e-6;
const WEIGHT_FLOOR: f64 = 1e-10;
const LN_2PI: f64 = 1.8378770664093453;

/// Arguments for Gaussian mixture fitting
#[derive(Debug, Clone)]
pub struct GmmArgs {
    /// Number of mixture components
    pub n_components: usize,
    /// Maximum number of EM iterations
    pub max_iter: usize,
    /// Stop when the mean log-likelihood improves by less than this
    pub tol: f64,
    /// RNG seed for k-means++ initialization
    pub seed: u64,
    /// Block size for the parallel E-step
    pub block_size: usize,
}

impl Default for GmmArgs {
    fn default() -> Self {
        Self {
            n_components: 1,
            max_iter: 100,
            tol: 1e-4,
            seed: 42,
            block_size: 1000,
        }
    }
}

impl GmmArgs {
    pub fn with_components(n_components: usize) -> Self {
        Self {
            n_components,
            ..Default::default()
        }
    }
}

/// A fitted mixture: component means, diagonal variances, and mixing
/// weights (log scale), all `k x d` or length `k`.
pub struct GaussianMixture {
    pub means: DMatrix<f64>,
    pub variances: DMatrix<f64>,
    pub log_weights: DVector<f64>,
    /// Mean per-row log-likelihood at the last iteration
    pub log_likelihood: f64,
    pub n_iter: usize,
}

/// Per-block E-step sufficient statistics
struct EStepStat {
    resp_sum: DVector<f64>,
    wsum_x: DMatrix<f64>,
    wsum_x2: DMatrix<f64>,
    llik: f64,
}

impl GaussianMixture {
    pub fn fit(data: &Mat, args: &GmmArgs) -> anyhow::Result<Self> {
        let (nn, dd) = data.shape();
        let kk = args.n_components;

        if kk == 0 {
            anyhow::bail!("need at least one mixture component");
        }
        if kk > nn {
            anyhow::bail!("{} components for {} rows", kk, nn);
        }

        let mut rng = StdRng::seed_from_u64(args.seed);

        let global_var = column_variances(data);
        let mut means = DMatrix::<f64>::zeros(kk, dd);
        for (c, &row) in kmeans_plus_plus_rows(data, kk, &mut rng).iter().enumerate() {
            for j in 0..dd {
                means[(c, j)] = data[(row, j)] as f64;
            }
        }

        let mut variances = DMatrix::<f64>::from_fn(kk, dd, |_, j| global_var[j]);
        let mut log_weights = DVector::<f64>::from_element(kk, -(kk as f64).ln());

        let mut prev_llik = f64::NEG_INFINITY;
        let mut llik = f64::NEG_INFINITY;
        let mut n_iter = 0;

        for iter in 0..args.max_iter.max(1) {
            n_iter = iter + 1;

            let stat = e_step(data, &means, &variances, &log_weights, args.block_size);
            llik = stat.llik / nn.max(1) as f64;

            // M-step
            for c in 0..kk {
                let nk = stat.resp_sum[c];
                if nk < 1e-6 {
                    // re-seed a starved component at the point the
                    // current mixture explains worst
                    let hardest = hardest_row(data, &means, &variances, &log_weights);
                    for j in 0..dd {
                        means[(c, j)] = data[(hardest, j)] as f64;
                        variances[(c, j)] = global_var[j];
                    }
                    log_weights[c] = (1.0 / nn as f64).ln();
                    continue;
                }
                for j in 0..dd {
                    let mu = stat.wsum_x[(c, j)] / nk;
                    means[(c, j)] = mu;
                    variances[(c, j)] = (stat.wsum_x2[(c, j)] / nk - mu * mu).max(VAR_FLOOR);
                }
                log_weights[c] = (nk / nn as f64).max(WEIGHT_FLOOR).ln();
            }

            // renormalize weights
            let lse = log_sum_exp(log_weights.as_slice());
            log_weights.add_scalar_mut(-lse);

            if (llik - prev_llik).abs() < args.tol {
                break;
            }
            prev_llik = llik;
        }

        Ok(Self {
            means,
            variances,
            log_weights,
            log_likelihood: llik,
            n_iter,
        })
    }

    /// Hard cluster assignment per row (argmax posterior)
    pub fn predict(&self, data: &Mat) -> Vec<usize> {
        let kk = self.means.nrows();
        (0..data.nrows())
            .map(|i| {
                let mut best = 0;
                let mut best_lp = f64::NEG_INFINITY;
                for c in 0..kk {
                    let lp =
                        self.log_weights[c] + log_pdf_diag(data, i, &self.means, &self.variances, c);
                    if lp > best_lp {
                        best_lp = lp;
                        best = c;
                    }
                }
                best
            })
            .collect()
    }

    pub fn n_components(&self) -> usize {
        self.means.nrows()
    }
}

fn log_pdf_diag(
    data: &Mat,
    i: usize,
    means: &DMatrix<f64>,
    variances: &DMatrix<f64>,
    c: usize,
) -> f64 {
    let mut acc = 0.0;
    for j in 0..data.ncols() {
        let v = variances[(c, j)];
        let gap = data[(i, j)] as f64 - means[(c, j)];
        acc += gap * gap / v + v.ln() + LN_2PI;
    }
    -0.5 * acc
}

fn log_sum_exp(xs: &[f64]) -> f64 {
    let m = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if m.is_infinite() {
        return m;
    }
    m + xs.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}

fn column_variances(data: &Mat) -> Vec<f64> {
    let nn = data.nrows().max(1) as f64;
    data.column_iter()
        .map(|col| {
            let mu: f64 = col.iter().map(|&x| x as f64).sum::<f64>() / nn;
            let v: f64 = col.iter().map(|&x| (x as f64 - mu).powi(2)).sum::<f64>() / nn;
            v.max(VAR_FLOOR)
        })
        .collect()
}

/// Distance-proportional (k-means++) row seeding
fn kmeans_plus_plus_rows(data: &Mat, kk: usize, rng: &mut StdRng) -> Vec<usize> {
    let nn = data.nrows();
    let mut chosen = Vec::with_capacity(kk);
    chosen.push(rng.random_range(0..nn));

    let mut d2: Vec<f64> = (0..nn)
        .map(|i| row_distance2(data, i, chosen[0]))
        .collect();

    while chosen.len() < kk {
        let total: f64 = d2.iter().sum();
        let next = if total <= 0.0 {
            // all remaining rows coincide with a chosen one
            (0..nn).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let mut u = rng.random::<f64>() * total;
            let mut pick = nn - 1;
            for (i, &w) in d2.iter().enumerate() {
                if u < w {
                    pick = i;
                    break;
                }
                u -= w;
            }
            pick
        };
        chosen.push(next);
        for i in 0..nn {
            d2[i] = d2[i].min(row_distance2(data, i, next));
        }
    }
    chosen
}

fn row_distance2(data: &Mat, i: usize, j: usize) -> f64 {
    data.row(i)
        .iter()
        .zip(data.row(j).iter())
        .map(|(&a, &b)| {
            let gap = a as f64 - b as f64;
            gap * gap
        })
        .sum()
}

fn e_step(
    data: &Mat,
    means: &DMatrix<f64>,
    variances: &DMatrix<f64>,
    log_weights: &DVector<f64>,
    block_size: usize,
) -> EStepStat {
    let (nn, dd) = data.shape();
    let kk = means.nrows();

    let jobs = create_jobs(nn, Some(block_size));

    let partials: Vec<EStepStat> = jobs
        .into_par_iter()
        .map(|(lb, ub)| {
            let mut stat = EStepStat {
                resp_sum: DVector::zeros(kk),
                wsum_x: DMatrix::zeros(kk, dd),
                wsum_x2: DMatrix::zeros(kk, dd),
                llik: 0.0,
            };
            let mut log_joint = vec![0.0f64; kk];

            for i in lb..ub {
                for c in 0..kk {
                    log_joint[c] = log_weights[c] + log_pdf_diag(data, i, means, variances, c);
                }
                let lse = log_sum_exp(&log_joint);
                stat.llik += lse;

                for c in 0..kk {
                    let resp = (log_joint[c] - lse).exp();
                    stat.resp_sum[c] += resp;
                    for j in 0..dd {
                        let x = data[(i, j)] as f64;
                        stat.wsum_x[(c, j)] += resp * x;
                        stat.wsum_x2[(c, j)] += resp * x * x;
                    }
                }
            }
            stat
        })
        .collect();

    // sequential reduction keeps the accumulation order deterministic
    partials
        .into_iter()
        .reduce(|mut acc, p| {
            acc.resp_sum += p.resp_sum;
            acc.wsum_x += p.wsum_x;
            acc.wsum_x2 += p.wsum_x2;
            acc.llik += p.llik;
            acc
        })
        .unwrap_or(EStepStat {
            resp_sum: DVector::zeros(kk),
            wsum_x: DMatrix::zeros(kk, dd),
            wsum_x2: DMatrix::zeros(kk, dd),
            llik: 0.0,
        })
}

fn hardest_row(
    data: &Mat,
    means: &DMatrix<f64>,
    variances: &DMatrix<f64>,
    log_weights: &DVector<f64>,
) -> usize {
    let kk = means.nrows();
    let mut worst = 0;
    let mut worst_lse = f64::INFINITY;
    let mut log_joint = vec![0.0f64; kk];

    for i in 0..data.nrows() {
        for c in 0..kk {
            log_joint[c] = log_weights[c] + log_pdf_diag(data, i, means, variances, c);
        }
        let lse = log_sum_exp(&log_joint);
        if lse < worst_lse {
            worst_lse = lse;
            worst = i;
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight, well-separated blobs of 10 points each in 3D
    fn two_blob_matrix() -> Mat {
        let mut rows = vec![];
        for i in 0..10 {
            let jitter = (i as f32) * 0.01;
            rows.extend([0.0 + jitter, 0.1 - jitter, 0.0]);
        }
        for i in 0..10 {
            let jitter = (i as f32) * 0.01;
            rows.extend([8.0 + jitter, 8.1 - jitter, 8.0]);
        }
        Mat::from_row_slice(20, 3, &rows)
    }

    #[test]
    fn test_two_blobs_recovered() -> anyhow::Result<()> {
        let data = two_blob_matrix();
        let gmm = GaussianMixture::fit(&data, &GmmArgs::with_components(2))?;
        let labels = gmm.predict(&data);

        assert_eq!(labels.len(), 20);
        assert!(labels.iter().all(|&c| c < 2));

        // each blob maps to one component, blobs to different ones
        assert!(labels[..10].iter().all(|&c| c == labels[0]));
        assert!(labels[10..].iter().all(|&c| c == labels[10]));
        assert_ne!(labels[0], labels[10]);
        Ok(())
    }

    #[test]
    fn test_seed_determinism() -> anyhow::Result<()> {
        let data = two_blob_matrix();
        let args = GmmArgs {
            n_components: 3,
            seed: 7,
            ..Default::default()
        };
        let a = GaussianMixture::fit(&data, &args)?.predict(&data);
        let b = GaussianMixture::fit(&data, &args)?.predict(&data);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_single_component() -> anyhow::Result<()> {
        let data = two_blob_matrix();
        let gmm = GaussianMixture::fit(&data, &GmmArgs::with_components(1))?;
        let labels = gmm.predict(&data);
        assert!(labels.iter().all(|&c| c == 0));
        Ok(())
    }

    #[test]
    fn test_too_many_components() {
        let data = Mat::from_row_slice(2, 1, &[0.0, 1.0]);
        assert!(GaussianMixture::fit(&data, &GmmArgs::with_components(3)).is_err());
        assert!(GaussianMixture::fit(&data, &GmmArgs::with_components(0)).is_err());
    }

    #[test]
    fn test_log_likelihood_finite() -> anyhow::Result<()> {
        let data = two_blob_matrix();
        let gmm = GaussianMixture::fit(&data, &GmmArgs::with_components(2))?;
        assert!(gmm.log_likelihood.is_finite());
        assert!(gmm.n_iter >= 1);
        Ok(())
    }
}
