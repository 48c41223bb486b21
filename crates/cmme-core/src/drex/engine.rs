//! Native DREX reference engine.
//!
//! Runs Bayesian online change-point inference: every time step spawns a new
//! context hypothesis weighted by the hazard, each live hypothesis predicts the
//! next observation from the statistics it has accumulated since its start,
//! and beliefs are re-weighted by how well each one predicted. Features are
//! conditionally independent given the context.

use std::f64::consts::LN_2;

use statrs::distribution::{Continuous, StudentsT};
use statrs::function::gamma::ln_gamma;

use super::fit::fit_prior;
use super::linalg::{dot, solve, sub_block};
use super::results::{DrexResults, FeaturePrediction};
use super::{DrexInstructions, Limit};
use crate::constants::{COVARIANCE_FLOOR, PREDICTION_GRID_PADDING, PREDICTION_GRID_POINTS};
use crate::error::{ModelError, Result};
use crate::prior::{Distribution, Prior};
use crate::stats::total_variation;

/// Run a DREX configuration. Unprocessed priors are fitted first.
pub fn run_drex(instructions: &DrexInstructions) -> Result<DrexResults> {
    let prior = fit_prior(instructions.prior())?;
    let distribution = prior.distribution();
    let obs = instructions.observations();
    let steps = obs.len();
    let features = instructions.input_sequence().feature_count();
    let d = prior.d_value();

    let initial: Vec<FeatureState> = (0..features)
        .map(|f| FeatureState::from_prior(&prior, f))
        .collect::<Result<_>>()?;
    let grids: Vec<Vec<f64>> = (0..features)
        .map(|f| {
            let series: Vec<f64> = obs.iter().map(|step| step[f]).collect();
            prediction_grid(distribution, &series)
        })
        .collect();

    let mut hyps = vec![Hypothesis {
        start: 0,
        belief: 1.0,
        states: initial.clone(),
    }];
    // hypothesis carrying the no-change context
    let mut baseline = Some(0);
    let mut surprisal = Vec::with_capacity(steps);
    let mut joint_surprisal = Vec::with_capacity(steps);
    let mut change_probability = Vec::with_capacity(steps);
    let mut context_beliefs = vec![belief_row(&hyps, steps)];
    let mut belief_dynamics = vec![0.0];
    let mut psi: Vec<FeaturePrediction> = grids
        .iter()
        .map(|g| FeaturePrediction {
            positions: g.clone(),
            prediction: Vec::with_capacity(steps),
        })
        .collect();

    for t in 0..steps {
        let x = &obs[t];
        let hazard = instructions.hazard().at(t);

        // log predictive density of x[f] under every hypothesis
        let mut ln_pred = vec![vec![f64::NAN; features]; hyps.len()];
        let mut surprisal_row = vec![f64::NAN; features];
        for f in 0..features {
            let noise = instructions.obsnz().for_feature(f);
            let predictives: Vec<Predictive> = hyps
                .iter()
                .map(|h| h.states[f].predictive(&recent(obs, h.start, t, f, d - 1), noise))
                .collect();

            let row: Vec<f64> = grids[f]
                .iter()
                .map(|&pos| {
                    hyps.iter()
                        .zip(&predictives)
                        .map(|(h, p)| h.belief * p.ln_pdf(pos).exp())
                        .sum::<f64>()
                })
                .collect();
            psi[f].prediction.push(row);

            if x[f].is_finite() {
                let terms: Vec<f64> = hyps
                    .iter()
                    .zip(&predictives)
                    .enumerate()
                    .map(|(i, (h, p))| {
                        let lp = p.ln_pdf(x[f]);
                        ln_pred[i][f] = lp;
                        h.belief.ln() + lp
                    })
                    .collect();
                surprisal_row[f] = -log_sum_exp(&terms) / LN_2;
            }
        }
        joint_surprisal.push(surprisal_row.iter().sum());
        surprisal.push(surprisal_row);

        // growth and change-point mass
        let log_w: Vec<f64> = hyps
            .iter()
            .zip(&ln_pred)
            .map(|(h, lp)| h.belief.ln() + lp.iter().filter(|v| !v.is_nan()).sum::<f64>())
            .collect();
        let top = log_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scaled: Vec<f64> = if top.is_finite() {
            log_w.iter().map(|w| (w - top).exp()).collect()
        } else {
            hyps.iter().map(|h| h.belief).collect()
        };
        let evidence: f64 = scaled.iter().sum();
        for (h, s) in hyps.iter_mut().zip(&scaled) {
            h.belief = s * (1.0 - hazard);
            let history = &obs[h.start..=t];
            for (f, state) in h.states.iter_mut().enumerate() {
                state.observe(history, f);
            }
        }
        hyps.push(Hypothesis {
            start: t + 1,
            belief: hazard * evidence,
            states: initial.clone(),
        });

        baseline = prune(
            &mut hyps,
            t + 1,
            instructions.memory(),
            instructions.maxhyp(),
            baseline,
        );
        renormalize(&mut hyps);

        let row = belief_row(&hyps, steps);
        let settled: f64 = hyps
            .iter()
            .filter(|h| Some(h.start) == baseline || h.start == t + 1)
            .map(|h| h.belief)
            .sum();
        change_probability.push((1.0 - settled).clamp(0.0, 1.0));
        if let Some(prev) = context_beliefs.last() {
            belief_dynamics.push(total_variation(prev, &row));
        }
        context_beliefs.push(row);
    }

    let threshold = instructions.change_decision_threshold();
    let changepoint = change_probability.iter().position(|&p| p >= threshold);

    Ok(DrexResults {
        prior,
        distribution,
        surprisal,
        joint_surprisal,
        context_beliefs,
        belief_dynamics,
        change_probability,
        changepoint,
        change_decision_threshold: threshold,
        psi,
        input_sequence: instructions.input_sequence().clone(),
        instructions_file_path: None,
    })
}

// ---------------------------------------------------------------------------
// Hypotheses
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Hypothesis {
    /// Time step the context began at.
    start: usize,
    belief: f64,
    states: Vec<FeatureState>,
}

fn belief_row(hyps: &[Hypothesis], steps: usize) -> Vec<f64> {
    let mut row = vec![0.0; steps + 1];
    for h in hyps {
        row[h.start] += h.belief;
    }
    row
}

/// Drop hypotheses older than `memory`, then keep the `maxhyp` most believed.
///
/// Belief of aged-out hypotheses moves to the oldest survivor, which also
/// takes over the baseline role when the baseline ages out. A baseline
/// dropped for low belief is gone. Returns the new baseline start.
fn prune(
    hyps: &mut Vec<Hypothesis>,
    now: usize,
    memory: Limit,
    maxhyp: Limit,
    baseline: Option<usize>,
) -> Option<usize> {
    let mut baseline = baseline;
    let mut aged = 0.0;
    let mut baseline_aged = false;
    hyps.retain(|h| {
        let keep = memory.allows(now - h.start);
        if !keep {
            aged += h.belief;
            baseline_aged |= Some(h.start) == baseline;
        }
        keep
    });
    if let Some(oldest) = hyps.iter_mut().min_by_key(|h| h.start) {
        oldest.belief += aged;
        if baseline_aged {
            baseline = Some(oldest.start);
        }
    } else if baseline_aged {
        baseline = None;
    }

    if let Some(max) = maxhyp.finite()
        && hyps.len() > max
    {
        hyps.sort_by(|a, b| b.belief.total_cmp(&a.belief));
        hyps.truncate(max);
        hyps.sort_by_key(|h| h.start);
        if !hyps.iter().any(|h| Some(h.start) == baseline) {
            baseline = None;
        }
    }
    baseline
}

fn renormalize(hyps: &mut [Hypothesis]) {
    let total: f64 = hyps.iter().map(|h| h.belief).sum();
    if total > 0.0 && total.is_finite() {
        for h in hyps.iter_mut() {
            h.belief /= total;
        }
    } else {
        let uniform = 1.0 / hyps.len() as f64;
        for h in hyps.iter_mut() {
            h.belief = uniform;
        }
    }
}

/// Up to `limit` trailing finite values of feature `f` in `obs[start..t]`.
fn recent(obs: &[Vec<f64>], start: usize, t: usize, f: usize, limit: usize) -> Vec<f64> {
    let mut out: Vec<f64> = obs[start..t]
        .iter()
        .rev()
        .map(|step| step[f])
        .take_while(|v| v.is_finite())
        .take(limit)
        .collect();
    out.reverse();
    out
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let top = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return top;
    }
    top + terms.iter().map(|v| (v - top).exp()).sum::<f64>().ln()
}

// ---------------------------------------------------------------------------
// Per-feature sufficient statistics
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Component {
    n: f64,
    mean: f64,
    scatter: f64,
    weight: f64,
}

#[derive(Clone, Debug)]
enum FeatureState {
    /// Normal-inverse-Wishart over D-step windows, optionally in log space.
    Gaussian {
        n: f64,
        mean: Vec<f64>,
        cov: Vec<Vec<f64>>,
        log: bool,
    },
    /// Gamma posterior over a Poisson rate.
    Poisson { shape: f64, rate: f64 },
    Mixture(Vec<Component>),
}

impl FeatureState {
    fn from_prior(prior: &Prior, f: usize) -> Result<Self> {
        let state = match prior {
            Prior::Gaussian(g) | Prior::LogGaussian(g) => FeatureState::Gaussian {
                n: g.n()[f],
                mean: g.means()[f].clone(),
                cov: g.covariance()[f].clone(),
                log: matches!(prior, Prior::LogGaussian(_)),
            },
            Prior::Poisson(p) => FeatureState::Poisson {
                shape: p.lambda()[f] * p.n()[f],
                rate: p.n()[f],
            },
            Prior::Gmm(g) => FeatureState::Mixture(
                (0..g.k()[f])
                    .map(|j| Component {
                        n: g.n()[f][j],
                        mean: g.means()[f][j],
                        scatter: g.variance()[f][j] * g.n()[f][j],
                        weight: g.pi()[f][j],
                    })
                    .collect(),
            ),
            Prior::Unprocessed(_) => {
                return Err(ModelError::InvalidParameters(
                    "prior must be fitted before it can seed a context".into(),
                ));
            }
        };
        Ok(state)
    }

    /// Predictive distribution for the next value given the trailing values
    /// of the current context.
    fn predictive(&self, recent: &[f64], noise: f64) -> Predictive {
        match self {
            FeatureState::Gaussian { n, mean, cov, log } => {
                let d = mean.len();
                let nu = (n - d as f64 + 1.0).max(1.0);
                let inflate = (n + 1.0) / nu;
                let sigma: Vec<Vec<f64>> = (0..d)
                    .map(|i| {
                        (0..d)
                            .map(|j| {
                                let ridge = if i == j { noise + COVARIANCE_FLOOR } else { 0.0 };
                                cov[i][j] * inflate + ridge
                            })
                            .collect()
                    })
                    .collect();
                let known: Vec<f64> = recent
                    .iter()
                    .map(|&v| if *log { v.ln() } else { v })
                    .collect();
                let m = known.len().min(d - 1);
                let known = &known[known.len() - m..];
                let idx: Vec<usize> = (d - 1 - m..d).collect();
                let s = sub_block(&sigma, &idx);

                let (loc, var, dof) = if m == 0 {
                    (mean[d - 1], s[0][0], nu)
                } else {
                    let s_aa: Vec<Vec<f64>> = s[..m].iter().map(|r| r[..m].to_vec()).collect();
                    let s_ab: Vec<f64> = s[..m].iter().map(|r| r[m]).collect();
                    let diff: Vec<f64> = known
                        .iter()
                        .zip(&idx[..m])
                        .map(|(v, &i)| v - mean[i])
                        .collect();
                    match (solve(&s_aa, &s_ab), solve(&s_aa, &diff)) {
                        (Some(w), Some(alpha)) => {
                            let delta = dot(&diff, &alpha);
                            let cond = (s[m][m] - dot(&s_ab, &w)).max(COVARIANCE_FLOOR);
                            (
                                mean[d - 1] + dot(&w, &diff),
                                cond * (nu + delta) / (nu + m as f64),
                                nu + m as f64,
                            )
                        }
                        _ => (mean[d - 1], s[m][m], nu),
                    }
                };
                Predictive::Student {
                    dist: student(loc, var, dof),
                    log: *log,
                }
            }
            FeatureState::Poisson { shape, rate } => Predictive::NegBinomial {
                shape: *shape,
                rate: *rate,
            },
            FeatureState::Mixture(components) => Predictive::Mixture(
                components
                    .iter()
                    .map(|c| {
                        let var = c.scatter / c.n + COVARIANCE_FLOOR;
                        let scale = var * (c.n + 1.0) / c.n + noise;
                        (c.weight.ln(), student(c.mean, scale, c.n.max(1.0)))
                    })
                    .collect(),
            ),
        }
    }

    /// Fold the newest value (last element of `history`) into the statistics.
    fn observe(&mut self, history: &[Vec<f64>], f: usize) {
        let Some(x) = history.last().map(|step| step[f]) else {
            return;
        };
        if !x.is_finite() {
            return;
        }
        match self {
            FeatureState::Gaussian { n, mean, cov, log } => {
                let d = mean.len();
                if history.len() < d {
                    return;
                }
                let window: Vec<f64> = history[history.len() - d..]
                    .iter()
                    .map(|step| if *log { step[f].ln() } else { step[f] })
                    .collect();
                if window.iter().any(|v| !v.is_finite()) {
                    return;
                }
                let n_new = *n + 1.0;
                let delta: Vec<f64> = window.iter().zip(mean.iter()).map(|(w, m)| w - m).collect();
                for i in 0..d {
                    mean[i] += delta[i] / n_new;
                }
                for i in 0..d {
                    for j in 0..d {
                        cov[i][j] = (*n * cov[i][j] + delta[i] * delta[j] * *n / n_new) / n_new;
                    }
                }
                *n = n_new;
            }
            FeatureState::Poisson { shape, rate } => {
                *shape += x;
                *rate += 1.0;
            }
            FeatureState::Mixture(components) => {
                let logs: Vec<f64> = components
                    .iter()
                    .map(|c| {
                        let var = c.scatter / c.n + COVARIANCE_FLOOR;
                        let dist = student(c.mean, var * (c.n + 1.0) / c.n, c.n.max(1.0));
                        c.weight.ln() + ln_student(&dist, x)
                    })
                    .collect();
                let z = log_sum_exp(&logs);
                if !z.is_finite() {
                    return;
                }
                for (c, l) in components.iter_mut().zip(&logs) {
                    let r = (l - z).exp();
                    let n_new = c.n + r;
                    let mean_new = c.mean + r * (x - c.mean) / n_new;
                    c.scatter += r * (x - c.mean) * (x - mean_new);
                    c.mean = mean_new;
                    c.n = n_new;
                }
                let total: f64 = components.iter().map(|c| c.n).sum();
                for c in components.iter_mut() {
                    c.weight = c.n / total;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Predictive densities
// ---------------------------------------------------------------------------

enum Predictive {
    Student {
        dist: Option<StudentsT>,
        log: bool,
    },
    NegBinomial {
        shape: f64,
        rate: f64,
    },
    Mixture(Vec<(f64, Option<StudentsT>)>),
}

impl Predictive {
    fn ln_pdf(&self, x: f64) -> f64 {
        match self {
            Predictive::Student { dist, log: false } => ln_student(dist, x),
            Predictive::Student { dist, log: true } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                ln_student(dist, x.ln()) - x.ln()
            }
            Predictive::NegBinomial { shape, rate } => {
                if x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                ln_gamma(x + shape) - ln_gamma(*shape) - ln_gamma(x + 1.0)
                    + shape * (rate / (rate + 1.0)).ln()
                    - x * (rate + 1.0).ln()
            }
            Predictive::Mixture(parts) => {
                let terms: Vec<f64> = parts.iter().map(|(lw, d)| lw + ln_student(d, x)).collect();
                log_sum_exp(&terms)
            }
        }
    }
}

fn student(loc: f64, var: f64, dof: f64) -> Option<StudentsT> {
    StudentsT::new(loc, var.max(COVARIANCE_FLOOR).sqrt(), dof).ok()
}

fn ln_student(dist: &Option<StudentsT>, x: f64) -> f64 {
    dist.as_ref()
        .map(|d| d.ln_pdf(x))
        .unwrap_or(f64::NEG_INFINITY)
}

/// Evaluation grid for the per-step predictive of one feature.
fn prediction_grid(distribution: Distribution, series: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
    let (lo, hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if finite.is_empty() {
        return linspace(0.0, 1.0, PREDICTION_GRID_POINTS);
    }
    match distribution {
        Distribution::Poisson => {
            let top = (hi * (1.0 + PREDICTION_GRID_PADDING)).ceil().max(hi + 1.0) as usize;
            (0..=top).map(|v| v as f64).collect()
        }
        Distribution::LogGaussian => {
            let (llo, lhi) = (lo.ln(), hi.ln());
            let pad = padding(lhi - llo);
            linspace(llo - pad, lhi + pad, PREDICTION_GRID_POINTS)
                .into_iter()
                .map(f64::exp)
                .collect()
        }
        Distribution::Gaussian | Distribution::Gmm => {
            let pad = padding(hi - lo);
            linspace(lo - pad, hi + pad, PREDICTION_GRID_POINTS)
        }
    }
}

fn padding(span: f64) -> f64 {
    if span > 0.0 {
        span * PREDICTION_GRID_PADDING
    } else {
        1.0
    }
}

fn linspace(lo: f64, hi: f64, points: usize) -> Vec<f64> {
    let step = (hi - lo) / (points - 1) as f64;
    (0..points).map(|i| lo + step * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drex::{DrexBuilder, Hazard, ObsNoise};
    use crate::prior::{GaussianPrior, PoissonPrior, UnprocessedPrior};
    use crate::sequence::normalize;
    use approx::assert_relative_eq;

    fn gaussian_prior(mean: f64, var: f64, n: f64) -> Prior {
        Prior::Gaussian(GaussianPrior::new(vec![vec![mean]], vec![vec![vec![var]]], vec![n]).unwrap())
    }

    fn run(prior: Prior, values: Vec<f64>) -> DrexResults {
        let inst = DrexBuilder::new(prior, normalize(values).unwrap())
            .to_instructions_file()
            .unwrap();
        run_drex(&inst).unwrap()
    }

    #[test]
    fn test_output_shapes() {
        let res = run(gaussian_prior(0.0, 1.0, 5.0), vec![0.1, -0.2, 0.3, 0.0, 0.2]);
        res.validate().unwrap();
        assert_eq!(res.surprisal.len(), 5);
        assert_eq!(res.joint_surprisal.len(), 5);
        assert_eq!(res.context_beliefs.len(), 6);
        assert_eq!(res.belief_dynamics.len(), 6);
        assert_eq!(res.context_beliefs[0][0], 1.0);
        assert_eq!(res.belief_dynamics[0], 0.0);
        assert_eq!(res.psi[0].positions.len(), PREDICTION_GRID_POINTS);
        assert!(res.surprisal.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_first_surprisal_is_prior_predictive() {
        // n = 5, D = 1: Student-t with 5 dof, scale² = var (n+1)/n
        let res = run(gaussian_prior(0.0, 1.0, 5.0), vec![0.0]);
        let t = StudentsT::new(0.0, (1.2f64 + COVARIANCE_FLOOR).sqrt(), 5.0).unwrap();
        assert_relative_eq!(res.surprisal[0][0], -t.pdf(0.0).log2(), epsilon = 1e-9);
    }

    #[test]
    fn test_detects_mean_shift() {
        let mut values = vec![0.0, 0.1, -0.1, 0.05, -0.05, 0.0, 0.1, -0.1];
        values.extend([8.0, 8.1, 7.9, 8.05, 7.95, 8.0]);
        let inst = DrexBuilder::new(gaussian_prior(0.0, 0.01, 10.0), normalize(values).unwrap())
            .threshold(0.5)
            .to_instructions_file()
            .unwrap();
        let res = run_drex(&inst).unwrap();
        assert_eq!(res.changepoint, Some(8));
        assert!(res.joint_surprisal[8] > res.joint_surprisal[7]);
        // the jump produces the largest belief update
        let (argmax, _) = res
            .belief_dynamics
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert!((9..=10).contains(&argmax));
    }

    #[test]
    fn test_stationary_input_has_no_changepoint() {
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let inst = DrexBuilder::new(gaussian_prior(0.0, 0.01, 50.0), normalize(values).unwrap())
            .threshold(0.5)
            .to_instructions_file()
            .unwrap();
        assert_eq!(run_drex(&inst).unwrap().changepoint, None);
    }

    fn stationary(limit: impl Fn(DrexBuilder) -> DrexBuilder) -> DrexResults {
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let builder = DrexBuilder::new(gaussian_prior(0.0, 0.01, 50.0), normalize(values).unwrap())
            .threshold(0.5);
        run_drex(&limit(builder).to_instructions_file().unwrap()).unwrap()
    }

    #[test]
    fn test_aged_out_context_is_not_a_change() {
        for memory in [2, 3, 5] {
            let res = stationary(|b| b.memory(Limit::Finite(memory)));
            res.validate().unwrap();
            assert_eq!(res.changepoint, None, "memory {memory}");
            assert!(
                res.change_probability.iter().all(|&p| p < 0.5),
                "memory {memory}: {:?}",
                res.change_probability
            );
        }
    }

    #[test]
    fn test_maxhyp_stationary_has_no_changepoint() {
        let res = stationary(|b| b.maxhyp(Limit::Finite(3)));
        assert_eq!(res.changepoint, None);
        assert!(res.change_probability.iter().all(|&p| p < 0.5));
    }

    #[test]
    fn test_finite_memory_still_detects_shift() {
        let mut values = vec![0.0, 0.1, -0.1, 0.05, -0.05, 0.0, 0.1, -0.1];
        values.extend([8.0, 8.1, 7.9, 8.05, 7.95, 8.0]);
        let inst = DrexBuilder::new(gaussian_prior(0.0, 0.01, 10.0), normalize(values).unwrap())
            .threshold(0.5)
            .memory(Limit::Finite(4))
            .to_instructions_file()
            .unwrap();
        let res = run_drex(&inst).unwrap();
        res.validate().unwrap();
        let cp = res.changepoint.unwrap();
        assert!((8..=10).contains(&cp), "changepoint {cp}");
        assert!(res.change_probability[..8].iter().all(|&p| p < 0.5));
    }

    #[test]
    fn test_unfitted_prior_cannot_seed_state() {
        let seq = normalize(vec![1.0, 2.0, 3.0]).unwrap();
        let prior = Prior::Unprocessed(
            UnprocessedPrior::new(Distribution::Gaussian, seq, None, None, None).unwrap(),
        );
        assert!(matches!(
            FeatureState::from_prior(&prior, 0),
            Err(ModelError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_zero_hazard_keeps_single_context() {
        let inst = DrexBuilder::new(
            gaussian_prior(0.0, 1.0, 5.0),
            normalize(vec![0.0, 5.0, -5.0]).unwrap(),
        )
        .hazard(Hazard::Constant(0.0))
        .to_instructions_file()
        .unwrap();
        let res = run_drex(&inst).unwrap();
        for row in &res.context_beliefs {
            assert_relative_eq!(row[0], 1.0, epsilon = 1e-12);
        }
        assert!(res.change_probability.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_memory_limits_context_age() {
        let inst = DrexBuilder::new(
            gaussian_prior(0.0, 1.0, 5.0),
            normalize(vec![0.0; 6]).unwrap(),
        )
        .memory(Limit::Finite(2))
        .to_instructions_file()
        .unwrap();
        let res = run_drex(&inst).unwrap();
        res.validate().unwrap();
        for (t, row) in res.context_beliefs.iter().enumerate() {
            for (start, &b) in row.iter().enumerate() {
                if t > start + 2 {
                    assert_eq!(b, 0.0, "row {t} start {start}");
                }
            }
        }
    }

    #[test]
    fn test_maxhyp_bounds_live_hypotheses() {
        let inst = DrexBuilder::new(
            gaussian_prior(0.0, 1.0, 5.0),
            normalize(vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap(),
        )
        .maxhyp(Limit::Finite(2))
        .to_instructions_file()
        .unwrap();
        let res = run_drex(&inst).unwrap();
        for row in &res.context_beliefs {
            assert!(row.iter().filter(|&&b| b > 0.0).count() <= 2);
        }
    }

    #[test]
    fn test_multifeature_joint_is_sum() {
        let prior = Prior::Gaussian(
            GaussianPrior::new(
                vec![vec![0.0], vec![1.0]],
                vec![vec![vec![1.0]], vec![vec![1.0]]],
                vec![4.0, 4.0],
            )
            .unwrap(),
        );
        let inst = DrexBuilder::new(
            prior,
            normalize(vec![vec![0.0, 0.5, 0.2], vec![1.0, 1.2, 0.9]]).unwrap(),
        )
        .obsnz(ObsNoise::PerFeature(vec![0.0, 0.1]))
        .to_instructions_file()
        .unwrap();
        let res = run_drex(&inst).unwrap();
        for t in 0..3 {
            assert_relative_eq!(
                res.joint_surprisal[t],
                res.surprisal[t][0] + res.surprisal[t][1],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_gaussian_window_conditioning() {
        // strongly correlated consecutive values: after seeing 1.0 the
        // prediction should move towards 1.0
        let prior = Prior::Gaussian(
            GaussianPrior::new(
                vec![vec![0.0, 0.0]],
                vec![vec![vec![1.0, 0.9], vec![0.9, 1.0]]],
                vec![100.0],
            )
            .unwrap(),
        );
        let inst = DrexBuilder::new(prior, normalize(vec![1.0, 1.0]).unwrap())
            .hazard(Hazard::Constant(0.0))
            .to_instructions_file()
            .unwrap();
        let res = run_drex(&inst).unwrap();
        let mode = res.psi[0].mode_at(1).unwrap();
        assert!(mode > 0.7 && mode < 1.1, "mode {mode}");
        assert!(res.surprisal[1][0] < res.surprisal[0][0]);
    }

    #[test]
    fn test_poisson_grid_and_predictive() {
        let prior = Prior::Poisson(PoissonPrior::new(vec![3.0], vec![10.0], 1).unwrap());
        let res = run(prior, vec![2.0, 3.0, 8.0, 3.0]);
        res.validate().unwrap();
        let positions = &res.psi[0].positions;
        assert_eq!(positions[0], 0.0);
        assert!(positions.iter().all(|p| p.fract() == 0.0));
        assert!(*positions.last().unwrap() >= 9.0);
        // probability masses on the integer grid
        let mass: f64 = res.psi[0].prediction[0].iter().sum();
        assert!(mass > 0.95 && mass <= 1.0 + 1e-9);
    }

    #[test]
    fn test_lognormal_grid_positive() {
        let seq = normalize(vec![1.0, 2.0, 4.0, 8.0]).unwrap();
        let prior = Prior::Unprocessed(
            UnprocessedPrior::new(Distribution::LogGaussian, seq, None, None, None).unwrap(),
        );
        let res = run(prior, vec![1.5, 3.0, 6.0]);
        assert!(res.psi[0].positions.iter().all(|&p| p > 0.0));
        assert!(matches!(res.prior, Prior::LogGaussian(_)));
        assert!(res.surprisal.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_gmm_prior_runs() {
        let mut raw = vec![0.0, 0.1, -0.1, 0.05];
        raw.extend([5.0, 5.1, 4.9, 5.05]);
        let seq = normalize(raw).unwrap();
        let prior = Prior::Unprocessed(
            UnprocessedPrior::new(Distribution::Gmm, seq, None, Some(3), None).unwrap(),
        );
        let res = run(prior, vec![0.0, 5.0, 0.1, 4.9]);
        res.validate().unwrap();
        assert!(matches!(res.prior, Prior::Gmm(_)));
        // a bimodal prior predicts both modes well
        assert!(res.surprisal[1][0] < 10.0);
    }

    #[test]
    fn test_nan_input_gives_nan_surprisal() {
        let res = run(gaussian_prior(0.0, 1.0, 5.0), vec![0.0, f64::NAN, 0.0]);
        assert!(res.surprisal[1][0].is_nan());
        assert!(res.surprisal[2][0].is_finite());
        res.validate().unwrap();
    }
}
