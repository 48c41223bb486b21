use std::path::PathBuf;

use super::{Alphabet, PpmModelType};
use crate::constants::DISTRIBUTION_TOLERANCE;
use crate::error::{ModelError, Result};
use crate::stats::information_content;

/// Prediction record for one observed event.
#[derive(Clone, Debug, PartialEq)]
pub struct PpmEvent {
    pub symbol: f64,
    /// Zero-based index within the trial.
    pub position: usize,
    /// Event time; DECAY models only.
    pub time: Option<f64>,
    pub model_order: usize,
    pub information_content: f64,
    pub entropy: f64,
    /// Predictive distribution in alphabet order.
    pub distribution: Vec<f64>,
}

/// Parsed output of a PPM run: one row group per trial.
#[derive(Clone, Debug, PartialEq)]
pub struct PpmResults {
    pub model_type: PpmModelType,
    pub alphabet: Alphabet,
    pub instructions_file_path: Option<PathBuf>,
    pub data_file_path: Option<PathBuf>,
    pub trials: Vec<Vec<PpmEvent>>,
}

impl PpmResults {
    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    pub fn last_trial(&self) -> &[PpmEvent] {
        self.trials.last().map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// Observed symbols of the last trial.
    pub fn observed_symbols(&self) -> Vec<f64> {
        self.last_trial().iter().map(|e| e.symbol).collect()
    }

    /// Check the per-event invariants: distributions cover the alphabet and
    /// sum to one, the observed symbol has positive probability, and
    /// information content matches it.
    pub fn validate(&self) -> Result<()> {
        for (t, trial) in self.trials.iter().enumerate() {
            for event in trial {
                if event.distribution.len() != self.alphabet.len() {
                    return Err(ModelError::input(format!(
                        "trial {t} position {}: distribution has {} entries, alphabet has {}",
                        event.position,
                        event.distribution.len(),
                        self.alphabet.len()
                    )));
                }
                let sum: f64 = event.distribution.iter().sum();
                if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE * self.alphabet.len() as f64 {
                    return Err(ModelError::input(format!(
                        "trial {t} position {}: distribution sums to {sum}",
                        event.position
                    )));
                }
                let idx = self.alphabet.index_of(event.symbol).ok_or_else(|| {
                    ModelError::input(format!("symbol {} not in alphabet", event.symbol))
                })?;
                let p = event.distribution[idx];
                if p.is_nan() || p <= 0.0 || !event.information_content.is_finite() {
                    return Err(ModelError::input(format!(
                        "trial {t} position {}: observed symbol {} has probability {p}",
                        event.position, event.symbol
                    )));
                }
                let expected = information_content(p);
                if (expected - event.information_content).abs() > 1e-6 {
                    return Err(ModelError::input(format!(
                        "trial {t} position {}: information content {} != {expected}",
                        event.position, event.information_content
                    )));
                }
            }
        }
        Ok(())
    }
}
