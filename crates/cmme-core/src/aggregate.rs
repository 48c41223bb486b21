//! Align a PPM result with a DREX result over the same observations.

use serde::Serialize;

use crate::drex::DrexResults;
use crate::error::{ModelError, Result};
use crate::ppm::PpmResults;
use crate::sequence::InputSequence;
use crate::stats::entropy_bits;

/// How PPM symbols and DREX observations are compared.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum AlignmentPolicy {
    /// Elementwise `==`.
    #[default]
    Exact,
    /// Elementwise `|a − b| <= eps`.
    Tolerance(f64),
}

impl AlignmentPolicy {
    fn matches(&self, a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter().zip(b).all(|(x, y)| match self {
                AlignmentPolicy::Exact => x == y,
                AlignmentPolicy::Tolerance(eps) => (x - y).abs() <= *eps,
            })
    }
}

/// One observed step with both models' outputs side by side.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateRow {
    pub observation: Vec<f64>,
    pub ppm_information_content: f64,
    pub drex_joint_surprisal: f64,
    pub ppm_model_order: usize,
    pub ppm_predictive_distribution: Vec<f64>,
    pub drex_predictive_distribution: Vec<f64>,
    pub ppm_entropy: f64,
    pub drex_entropy: f64,
    /// Belief over context starts after observing this step.
    pub drex_context_beliefs: Vec<f64>,
    pub drex_belief_dynamics: f64,
    pub drex_change_probability: f64,
    pub drex_change_changepoint: Option<usize>,
    pub drex_change_threshold: f64,
    pub ppm_alphabet_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateFrame {
    /// DREX feature whose series matched the PPM symbols.
    pub drex_feature: usize,
    pub ppm_alphabet: Vec<f64>,
    pub drex_positions: Vec<f64>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the comparison frame. Inputs are left untouched.
pub fn aggregate(
    ppm: &PpmResults,
    drex: &DrexResults,
    input: &InputSequence,
    policy: AlignmentPolicy,
) -> Result<AggregateFrame> {
    let symbols = ppm.observed_symbols();
    let observations = input.last_trial();
    if observations.len() != symbols.len() {
        return Err(ModelError::Unaligned(format!(
            "input has {} steps, PPM observed {}",
            observations.len(),
            symbols.len()
        )));
    }

    let feature = (0..drex.feature_count())
        .find(|&f| policy.matches(&drex.observed_series(f), &symbols))
        .ok_or_else(|| {
            ModelError::Unaligned(format!(
                "no DREX feature matches the {} PPM symbols",
                symbols.len()
            ))
        })?;
    let psi = &drex.psi[feature];

    // a univariate input is compared as is, otherwise on the matched feature
    let column = if input.feature_count() == 1 { 0 } else { feature };
    let declared: Vec<f64> = observations
        .iter()
        .map(|step| step.get(column).copied().unwrap_or(f64::NAN))
        .collect();
    if !policy.matches(&declared, &symbols) {
        return Err(ModelError::Unaligned(format!(
            "input feature {column} differs from the PPM symbols"
        )));
    }

    let rows = ppm
        .last_trial()
        .iter()
        .enumerate()
        .map(|(t, event)| {
            let drex_dist = psi.prediction[t].clone();
            AggregateRow {
                observation: observations[t].clone(),
                ppm_information_content: event.information_content,
                drex_joint_surprisal: drex.joint_surprisal[t],
                ppm_model_order: event.model_order,
                ppm_predictive_distribution: event.distribution.clone(),
                drex_entropy: entropy_bits(&drex_dist),
                drex_predictive_distribution: drex_dist,
                ppm_entropy: event.entropy,
                drex_context_beliefs: drex.context_beliefs[t + 1].clone(),
                drex_belief_dynamics: drex.belief_dynamics[t + 1],
                drex_change_probability: drex.change_probability[t],
                drex_change_changepoint: drex.changepoint,
                drex_change_threshold: drex.change_decision_threshold,
                ppm_alphabet_size: ppm.alphabet.len(),
            }
        })
        .collect();

    Ok(AggregateFrame {
        drex_feature: feature,
        ppm_alphabet: ppm.alphabet.levels().to_vec(),
        drex_positions: psi.positions.clone(),
        rows,
    })
}
