//! DREX: Bayesian online change-point prediction over parametric priors.

pub mod engine;
pub mod fit;
mod linalg;
pub mod results;

use std::path::PathBuf;

use crate::error::{ModelError, Result};
use crate::prior::{Distribution, Prior};
use crate::sequence::InputSequence;

pub use engine::run_drex;
pub use fit::fit_prior;
pub use results::{DrexResults, FeaturePrediction};

/// Prior per-step probability of a change-point.
#[derive(Clone, Debug, PartialEq)]
pub enum Hazard {
    Constant(f64),
    /// One value per input time step.
    PerStep(Vec<f64>),
}

impl Hazard {
    pub fn at(&self, t: usize) -> f64 {
        match self {
            Hazard::Constant(h) => *h,
            Hazard::PerStep(hs) => hs[t],
        }
    }

    pub fn values(&self) -> Vec<f64> {
        match self {
            Hazard::Constant(h) => vec![*h],
            Hazard::PerStep(hs) => hs.clone(),
        }
    }
}

/// A count bound that may be unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    Finite(usize),
    Infinite,
}

impl Limit {
    pub fn allows(&self, n: usize) -> bool {
        match self {
            Limit::Finite(max) => n <= *max,
            Limit::Infinite => true,
        }
    }

    pub fn finite(&self) -> Option<usize> {
        match self {
            Limit::Finite(n) => Some(*n),
            Limit::Infinite => None,
        }
    }
}

/// Observation noise variance, shared or per feature.
#[derive(Clone, Debug, PartialEq)]
pub enum ObsNoise {
    Scalar(f64),
    PerFeature(Vec<f64>),
}

impl ObsNoise {
    pub fn for_feature(&self, f: usize) -> f64 {
        match self {
            ObsNoise::Scalar(v) => *v,
            ObsNoise::PerFeature(vs) => vs[f],
        }
    }

    pub fn values(&self) -> Vec<f64> {
        match self {
            ObsNoise::Scalar(v) => vec![*v],
            ObsNoise::PerFeature(vs) => vs.clone(),
        }
    }
}

/// Immutable snapshot of a DREX configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DrexInstructions {
    prior: Prior,
    input_sequence: InputSequence,
    hazard: Hazard,
    obsnz: ObsNoise,
    memory: Limit,
    maxhyp: Limit,
    change_decision_threshold: f64,
    results_file_path: Option<PathBuf>,
}

impl DrexInstructions {
    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    pub fn distribution(&self) -> Distribution {
        self.prior.distribution()
    }

    pub fn d_value(&self) -> usize {
        self.prior.d_value()
    }

    pub fn input_sequence(&self) -> &InputSequence {
        &self.input_sequence
    }

    /// The single trial DREX runs over (time × feature).
    pub fn observations(&self) -> &[Vec<f64>] {
        self.input_sequence.last_trial()
    }

    pub fn hazard(&self) -> &Hazard {
        &self.hazard
    }

    pub fn obsnz(&self) -> &ObsNoise {
        &self.obsnz
    }

    pub fn memory(&self) -> Limit {
        self.memory
    }

    pub fn maxhyp(&self) -> Limit {
        self.maxhyp
    }

    pub fn change_decision_threshold(&self) -> f64 {
        self.change_decision_threshold
    }

    pub fn max_components(&self) -> Option<usize> {
        self.prior.max_components()
    }

    pub fn results_file_path(&self) -> Option<&PathBuf> {
        self.results_file_path.as_ref()
    }

    pub fn with_results_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_file_path = Some(path.into());
        self
    }
}

/// Mutable DREX configuration. Defaults: hazard 0.01, no observation noise,
/// unlimited memory and hypotheses, change threshold 0.01.
#[derive(Clone, Debug)]
pub struct DrexBuilder {
    pub prior: Prior,
    pub input_sequence: InputSequence,
    pub hazard: Hazard,
    pub obsnz: ObsNoise,
    pub memory: Limit,
    pub maxhyp: Limit,
    pub change_decision_threshold: f64,
    pub results_file_path: Option<PathBuf>,
}

impl DrexBuilder {
    pub fn new(prior: Prior, input_sequence: InputSequence) -> Self {
        Self {
            prior,
            input_sequence,
            hazard: Hazard::Constant(0.01),
            obsnz: ObsNoise::Scalar(0.0),
            memory: Limit::Infinite,
            maxhyp: Limit::Infinite,
            change_decision_threshold: 0.01,
            results_file_path: None,
        }
    }

    pub fn hazard(mut self, hazard: Hazard) -> Self {
        self.hazard = hazard;
        self
    }

    pub fn obsnz(mut self, obsnz: ObsNoise) -> Self {
        self.obsnz = obsnz;
        self
    }

    pub fn memory(mut self, memory: Limit) -> Self {
        self.memory = memory;
        self
    }

    pub fn maxhyp(mut self, maxhyp: Limit) -> Self {
        self.maxhyp = maxhyp;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.change_decision_threshold = threshold;
        self
    }

    pub fn to_instructions_file(&self) -> Result<DrexInstructions> {
        if !self.input_sequence.is_single_trial() {
            return Err(ModelError::params(format!(
                "DREX runs on a single trial, got {}",
                self.input_sequence.trial_count()
            )));
        }
        let n = self.input_sequence.total_len();
        let features = self.input_sequence.feature_count();
        if self.prior.feature_count() != features {
            return Err(ModelError::params(format!(
                "prior has {} features, input has {features}",
                self.prior.feature_count()
            )));
        }

        let hazards = self.hazard.values();
        if let Hazard::PerStep(hs) = &self.hazard
            && hs.len() != n
        {
            return Err(ModelError::params(format!(
                "hazard vector has {} entries, input has {n} steps",
                hs.len()
            )));
        }
        if hazards.iter().any(|h| !(0.0..=1.0).contains(h)) {
            return Err(ModelError::params("hazard must lie in [0, 1]"));
        }

        if let ObsNoise::PerFeature(vs) = &self.obsnz
            && vs.len() != features
        {
            return Err(ModelError::params(format!(
                "obsnz has {} entries, input has {features} features",
                vs.len()
            )));
        }
        if self.obsnz.values().iter().any(|v| !(*v >= 0.0) || !v.is_finite()) {
            return Err(ModelError::params("obsnz must be finite and non-negative"));
        }

        if let Limit::Finite(m) = self.memory
            && m < 2
        {
            return Err(ModelError::params(format!("memory must be at least 2, got {m}")));
        }
        if let Limit::Finite(m) = self.maxhyp
            && m < 1
        {
            return Err(ModelError::params("maxhyp must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.change_decision_threshold) {
            return Err(ModelError::params(format!(
                "change decision threshold {} must lie in [0, 1]",
                self.change_decision_threshold
            )));
        }

        match self.prior.distribution() {
            Distribution::LogGaussian
                if self.input_sequence.values().any(|v| v.is_finite() && v <= 0.0) =>
            {
                return Err(ModelError::params(
                    "lognormal DREX input must be strictly positive",
                ));
            }
            Distribution::Poisson
                if self.input_sequence.values().any(|v| v.is_finite() && v < 0.0) =>
            {
                return Err(ModelError::params("poisson DREX input must be non-negative"));
            }
            _ => {}
        }

        Ok(DrexInstructions {
            prior: self.prior.clone(),
            input_sequence: self.input_sequence.clone(),
            hazard: self.hazard.clone(),
            obsnz: self.obsnz.clone(),
            memory: self.memory,
            maxhyp: self.maxhyp,
            change_decision_threshold: self.change_decision_threshold,
            results_file_path: self.results_file_path.clone(),
        })
    }
}
