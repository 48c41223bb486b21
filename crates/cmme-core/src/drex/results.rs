use std::path::PathBuf;

use crate::constants::DISTRIBUTION_TOLERANCE;
use crate::error::{ModelError, Result};
use crate::prior::{Distribution, Prior};
use crate::sequence::InputSequence;

/// Predictive density of one feature evaluated on a fixed grid, per time step.
#[derive(Clone, Debug, PartialEq)]
pub struct FeaturePrediction {
    /// Grid positions, ascending.
    pub positions: Vec<f64>,
    /// T rows, one value per position.
    pub prediction: Vec<Vec<f64>>,
}

impl FeaturePrediction {
    /// Position with the highest predicted density at step `t`.
    pub fn mode_at(&self, t: usize) -> Option<f64> {
        let row = self.prediction.get(t)?;
        row.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.positions[i])
    }
}

/// Parsed output of a DREX run.
#[derive(Clone, Debug, PartialEq)]
pub struct DrexResults {
    /// The fitted prior the run used.
    pub prior: Prior,
    pub distribution: Distribution,
    /// T×F per-feature surprisal in bits.
    pub surprisal: Vec<Vec<f64>>,
    /// Length T; sum of per-feature surprisal.
    pub joint_surprisal: Vec<f64>,
    /// (T+1)×(T+1); row t is the belief over context start times after t steps.
    pub context_beliefs: Vec<Vec<f64>>,
    /// Length T+1; belief change between consecutive rows of `context_beliefs`.
    pub belief_dynamics: Vec<f64>,
    /// Length T; probability that a change has happened by step t.
    pub change_probability: Vec<f64>,
    pub changepoint: Option<usize>,
    pub change_decision_threshold: f64,
    /// One grid prediction per feature.
    pub psi: Vec<FeaturePrediction>,
    pub input_sequence: InputSequence,
    pub instructions_file_path: Option<PathBuf>,
}

impl DrexResults {
    pub fn time_steps(&self) -> usize {
        self.joint_surprisal.len()
    }

    pub fn feature_count(&self) -> usize {
        self.input_sequence.feature_count()
    }

    /// Observed values of one feature over the analysed trial.
    pub fn observed_series(&self, feature: usize) -> Vec<f64> {
        self.input_sequence
            .last_trial()
            .iter()
            .map(|step| step[feature])
            .collect()
    }

    /// Check array shapes and that every belief row is a distribution.
    pub fn validate(&self) -> Result<()> {
        let t = self.input_sequence.last_trial().len();
        let f = self.feature_count();
        let shape_err = |what: &str| Err(ModelError::input(format!("DREX {what} has wrong shape")));

        if self.surprisal.len() != t || self.surprisal.iter().any(|r| r.len() != f) {
            return shape_err("surprisal");
        }
        if self.joint_surprisal.len() != t {
            return shape_err("joint surprisal");
        }
        if self.change_probability.len() != t {
            return shape_err("change probability");
        }
        if self.belief_dynamics.len() != t + 1 {
            return shape_err("belief dynamics");
        }
        if self.context_beliefs.len() != t + 1
            || self.context_beliefs.iter().any(|r| r.len() != t + 1)
        {
            return shape_err("context beliefs");
        }
        if self.psi.len() != f
            || self.psi.iter().any(|p| {
                p.prediction.len() != t
                    || p.prediction.iter().any(|row| row.len() != p.positions.len())
            })
        {
            return shape_err("psi");
        }
        for (i, row) in self.context_beliefs.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE * (t + 1) as f64 {
                return Err(ModelError::input(format!(
                    "context belief row {i} sums to {sum}"
                )));
            }
        }
        if let Some(cp) = self.changepoint
            && cp >= t
        {
            return Err(ModelError::input(format!("changepoint {cp} out of range")));
        }
        Ok(())
    }
}
