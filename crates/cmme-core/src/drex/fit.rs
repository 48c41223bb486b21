//! Fitting parametric priors from raw observations.

use statrs::distribution::{Continuous, Normal};

use crate::constants::{
    COVARIANCE_FLOOR, DEFAULT_GMM_BETA, DEFAULT_GMM_MAX_COMPONENTS, EPSILON, GMM_EM_ITERATIONS,
    POISSON_RATE_FLOOR,
};
use crate::error::{ModelError, Result};
use crate::prior::{Distribution, GaussianPrior, GmmPrior, PoissonPrior, Prior, UnprocessedPrior};
use crate::sequence::InputSequence;

/// Turn an `Unprocessed` prior into its fitted arm. Fitted priors pass through.
pub fn fit_prior(prior: &Prior) -> Result<Prior> {
    let Prior::Unprocessed(raw) = prior else {
        return Ok(prior.clone());
    };
    match raw.distribution() {
        Distribution::Gaussian => Ok(Prior::Gaussian(fit_gaussian(raw, false)?)),
        Distribution::LogGaussian => Ok(Prior::LogGaussian(fit_gaussian(raw, true)?)),
        Distribution::Gmm => Ok(Prior::Gmm(fit_gmm(raw)?)),
        Distribution::Poisson => Ok(Prior::Poisson(fit_poisson(raw)?)),
    }
}

/// All D-step windows of one feature, across every trial. Windows holding a
/// non-finite value are skipped.
fn windows(seq: &InputSequence, feature: usize, d: usize, log: bool) -> Vec<Vec<f64>> {
    let mut out = Vec::new();
    for trial in seq.trials() {
        let series: Vec<f64> = trial
            .iter()
            .map(|step| if log { step[feature].ln() } else { step[feature] })
            .collect();
        for w in series.windows(d) {
            if w.iter().all(|v| v.is_finite()) {
                out.push(w.to_vec());
            }
        }
    }
    out
}

fn fit_gaussian(raw: &UnprocessedPrior, log: bool) -> Result<GaussianPrior> {
    let d = raw.d_value();
    let mut means = Vec::new();
    let mut covariance = Vec::new();
    let mut counts = Vec::new();
    for f in 0..raw.feature_count() {
        let ws = windows(raw.sequence(), f, d, log);
        if ws.is_empty() {
            return Err(ModelError::params(format!(
                "prior feature {f} has no complete window of {d} finite values"
            )));
        }
        let n = ws.len() as f64;
        let mu: Vec<f64> = (0..d)
            .map(|i| ws.iter().map(|w| w[i]).sum::<f64>() / n)
            .collect();
        let cov: Vec<Vec<f64>> = (0..d)
            .map(|i| {
                (0..d)
                    .map(|j| {
                        ws.iter()
                            .map(|w| (w[i] - mu[i]) * (w[j] - mu[j]))
                            .sum::<f64>()
                            / n
                    })
                    .collect()
            })
            .collect();
        means.push(mu);
        covariance.push(cov);
        counts.push(n);
    }
    GaussianPrior::new(means, covariance, counts)
}

fn fit_poisson(raw: &UnprocessedPrior) -> Result<PoissonPrior> {
    let mut lambda = Vec::new();
    let mut counts = Vec::new();
    for f in 0..raw.feature_count() {
        let values: Vec<f64> = raw
            .sequence()
            .trials()
            .iter()
            .flat_map(|trial| trial.iter().map(move |step| step[f]))
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return Err(ModelError::params(format!("prior feature {f} has no finite values")));
        }
        let n = values.len() as f64;
        lambda.push((values.iter().sum::<f64>() / n).max(POISSON_RATE_FLOOR));
        counts.push(n);
    }
    PoissonPrior::new(lambda, counts, raw.d_value())
}

// --- Gaussian mixture ---

/// Fitted components of one feature, sorted by mean.
#[derive(Debug)]
struct Mixture {
    means: Vec<f64>,
    variance: Vec<f64>,
    n: Vec<f64>,
    pi: Vec<f64>,
    sp: Vec<f64>,
}

fn fit_gmm(raw: &UnprocessedPrior) -> Result<GmmPrior> {
    let max = raw.max_components().unwrap_or(DEFAULT_GMM_MAX_COMPONENTS);
    let beta = raw.beta().unwrap_or(DEFAULT_GMM_BETA);
    let (mut means, mut variance, mut n, mut pi, mut sp, mut k) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for f in 0..raw.feature_count() {
        let values: Vec<f64> = windows(raw.sequence(), f, 1, false)
            .into_iter()
            .map(|w| w[0])
            .collect();
        if values.is_empty() {
            return Err(ModelError::params(format!("prior feature {f} has no finite values")));
        }
        let mix = em(&values, max, beta);
        k.push(mix.means.len());
        means.push(pad(mix.means, max));
        variance.push(pad(mix.variance, max));
        n.push(pad(mix.n, max));
        pi.push(pad(mix.pi, max));
        sp.push(pad(mix.sp, max));
    }
    GmmPrior::new(means, variance, n, pi, sp, k)
}

fn pad(mut v: Vec<f64>, width: usize) -> Vec<f64> {
    v.resize(width, 0.0);
    v
}

fn ln_normal(x: f64, mean: f64, var: f64) -> f64 {
    Normal::new(mean, var.sqrt())
        .map(|d| d.ln_pdf(x))
        .unwrap_or(f64::NEG_INFINITY)
}

/// Deterministic EM: components start at evenly spaced quantiles, run a fixed
/// number of iterations, and components whose weight falls below `beta` are
/// dropped. `sp` holds each component's likelihood: the mean over the data of
/// its weighted density `pi_j * N(x | mu_j, var_j)` under the final parameters.
fn em(values: &[f64], max_components: usize, beta: f64) -> Mixture {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();
    let k0 = max_components.min(distinct.len()).max(1);
    let total = values.len() as f64;

    let overall_mean = values.iter().sum::<f64>() / total;
    let overall_var = values.iter().map(|v| (v - overall_mean).powi(2)).sum::<f64>() / total;

    let mut mu: Vec<f64> = (0..k0)
        .map(|j| {
            let q = (j as f64 + 0.5) / k0 as f64;
            sorted[((q * sorted.len() as f64) as usize).min(sorted.len() - 1)]
        })
        .collect();
    let mut var = vec![(overall_var / k0 as f64).max(COVARIANCE_FLOOR); k0];
    let mut weight = vec![1.0 / k0 as f64; k0];
    let mut mass = vec![total / k0 as f64; k0];

    let mut resp = vec![vec![0.0; k0]; values.len()];
    for _ in 0..GMM_EM_ITERATIONS {
        for (i, &x) in values.iter().enumerate() {
            let logs: Vec<f64> = (0..k0)
                .map(|j| weight[j].ln() + ln_normal(x, mu[j], var[j]))
                .collect();
            let top = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !top.is_finite() {
                resp[i].fill(1.0 / k0 as f64);
                continue;
            }
            let z: f64 = logs.iter().map(|l| (l - top).exp()).sum();
            for j in 0..k0 {
                resp[i][j] = (logs[j] - top).exp() / z;
            }
        }
        for j in 0..k0 {
            let nj: f64 = resp.iter().map(|r| r[j]).sum();
            mass[j] = nj;
            weight[j] = nj / total;
            if nj < EPSILON {
                continue;
            }
            mu[j] = values.iter().zip(&resp).map(|(x, r)| r[j] * x).sum::<f64>() / nj;
            let scatter = values
                .iter()
                .zip(&resp)
                .map(|(x, r)| r[j] * (x - mu[j]).powi(2))
                .sum::<f64>();
            var[j] = scatter / nj + COVARIANCE_FLOOR;
        }
    }

    let mut keep: Vec<usize> = (0..k0).filter(|&j| weight[j] >= beta).collect();
    if keep.is_empty() {
        let best = (0..k0)
            .max_by(|&a, &b| weight[a].total_cmp(&weight[b]))
            .unwrap_or(0);
        keep.push(best);
    }
    keep.sort_by(|&a, &b| mu[a].total_cmp(&mu[b]));
    let kept_weight: f64 = keep.iter().map(|&j| weight[j]).sum();

    Mixture {
        means: keep.iter().map(|&j| mu[j]).collect(),
        variance: keep.iter().map(|&j| var[j]).collect(),
        n: keep.iter().map(|&j| mass[j].max(EPSILON)).collect(),
        pi: keep.iter().map(|&j| weight[j] / kept_weight).collect(),
        sp: keep
            .iter()
            .map(|&j| {
                values
                    .iter()
                    .map(|&x| (weight[j].ln() + ln_normal(x, mu[j], var[j])).exp())
                    .sum::<f64>()
                    / total
            })
            .collect(),
    }
}
