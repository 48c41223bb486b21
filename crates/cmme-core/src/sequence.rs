//! Unified input-sequence representation shared by all three models.
//!
//! Canonical shape is trials × time × features. User input arrives in one of
//! three nested shapes and is normalized here:
//!
//! - a flat list of scalars: one trial, one feature
//! - a list of flat lists: one trial, one feature per inner list
//! - a list of those: one trial per element
//!
//! Nested user input is feature-major (each inner list is the series of one
//! feature), so `[[1, 2, 3], [4, 5, 6]]` is three time steps of two features.

use serde_json::Value;

use crate::error::{ModelError, Result};

/// Canonical trials × time × features sequence. Feature count is constant
/// across every trial and every time step, and no trial is empty.
#[derive(Clone, Debug, PartialEq)]
pub struct InputSequence {
    trials: Vec<Vec<Vec<f64>>>,
    feature_count: usize,
}

/// Any of the accepted user-facing shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum RawSequence {
    Flat(Vec<f64>),
    Features(Vec<Vec<f64>>),
    Trials(Vec<Vec<Vec<f64>>>),
    Canonical(InputSequence),
}

impl From<Vec<f64>> for RawSequence {
    fn from(v: Vec<f64>) -> Self {
        RawSequence::Flat(v)
    }
}

impl From<&[f64]> for RawSequence {
    fn from(v: &[f64]) -> Self {
        RawSequence::Flat(v.to_vec())
    }
}

impl From<Vec<Vec<f64>>> for RawSequence {
    fn from(v: Vec<Vec<f64>>) -> Self {
        RawSequence::Features(v)
    }
}

impl From<Vec<Vec<Vec<f64>>>> for RawSequence {
    fn from(v: Vec<Vec<Vec<f64>>>) -> Self {
        RawSequence::Trials(v)
    }
}

impl From<InputSequence> for RawSequence {
    fn from(v: InputSequence) -> Self {
        RawSequence::Canonical(v)
    }
}

impl RawSequence {
    /// Interpret a JSON value as one of the nested shapes.
    /// Leaves must be numbers; nesting depth must be uniform.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(ModelError::input("sequence must be a JSON array"));
        };
        if items.is_empty() {
            return Err(ModelError::input("sequence is empty"));
        }
        match json_depth(value)? {
            1 => Ok(RawSequence::Flat(json_numbers(items)?)),
            2 => Ok(RawSequence::Features(
                items
                    .iter()
                    .map(|v| json_numbers(as_array(v)?))
                    .collect::<Result<_>>()?,
            )),
            3 => Ok(RawSequence::Trials(
                items
                    .iter()
                    .map(|trial| {
                        as_array(trial)?
                            .iter()
                            .map(|v| json_numbers(as_array(v)?))
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<_>>()?,
            )),
            d => Err(ModelError::input(format!(
                "sequence nesting depth {d} is not supported (expected 1 to 3)"
            ))),
        }
    }
}

fn as_array(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ModelError::input("mixed nesting depth in sequence"))
}

fn json_numbers(items: &[Value]) -> Result<Vec<f64>> {
    items
        .iter()
        .map(|v| match v {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ModelError::input(format!("non-numeric leaf: {v}"))),
            // NaN and infinities round-trip through JSON as null
            Value::Null => Ok(f64::NAN),
            other => Err(ModelError::input(format!("non-numeric leaf: {other}"))),
        })
        .collect()
}

/// Uniform nesting depth of a JSON array, counting the outer array as 1.
fn json_depth(value: &Value) -> Result<usize> {
    match value {
        Value::Array(items) => {
            let mut depth = None;
            for item in items {
                let d = json_depth(item)?;
                match depth {
                    None => depth = Some(d),
                    Some(prev) if prev != d => {
                        return Err(ModelError::input("mixed nesting depth in sequence"));
                    }
                    _ => {}
                }
            }
            Ok(1 + depth.unwrap_or(0))
        }
        _ => Ok(0),
    }
}

/// Canonicalize any accepted shape. Idempotent on canonical input.
pub fn normalize(raw: impl Into<RawSequence>) -> Result<InputSequence> {
    match raw.into() {
        RawSequence::Canonical(seq) => Ok(seq),
        RawSequence::Flat(values) => {
            if values.is_empty() {
                return Err(ModelError::input("sequence is empty"));
            }
            InputSequence::from_trials(vec![values.into_iter().map(|v| vec![v]).collect()])
        }
        RawSequence::Features(features) => {
            InputSequence::from_trials(vec![transpose_features(features)?])
        }
        RawSequence::Trials(trials) => {
            if trials.is_empty() {
                return Err(ModelError::input("sequence has no trials"));
            }
            let trials = trials
                .into_iter()
                .map(transpose_features)
                .collect::<Result<Vec<_>>>()?;
            InputSequence::from_trials(trials)
        }
    }
}

/// Feature-major (feature × time) into time-major (time × feature).
fn transpose_features(features: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
    let Some(first) = features.first() else {
        return Err(ModelError::input("trial has no features"));
    };
    let len = first.len();
    if len == 0 {
        return Err(ModelError::input("trial has no time steps"));
    }
    if let Some(bad) = features.iter().position(|f| f.len() != len) {
        return Err(ModelError::input(format!(
            "ragged trial: feature {bad} has {} steps, expected {len}",
            features[bad].len()
        )));
    }
    Ok((0..len)
        .map(|t| features.iter().map(|f| f[t]).collect())
        .collect())
}

impl InputSequence {
    /// Build from canonical trials × time × features data, validating shape.
    pub fn from_trials(trials: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        let feature_count = trials
            .first()
            .and_then(|t| t.first())
            .map(|step| step.len())
            .ok_or_else(|| ModelError::input("sequence is empty"))?;
        if feature_count == 0 {
            return Err(ModelError::input("time steps must carry at least one feature"));
        }
        for (i, trial) in trials.iter().enumerate() {
            if trial.is_empty() {
                return Err(ModelError::input(format!("trial {i} is empty")));
            }
            if let Some(t) = trial.iter().position(|step| step.len() != feature_count) {
                return Err(ModelError::input(format!(
                    "ragged sequence: trial {i} step {t} has {} features, expected {feature_count}",
                    trial[t].len()
                )));
            }
        }
        Ok(Self {
            trials,
            feature_count,
        })
    }

    /// Single-trial, single-feature sequence from scalars.
    pub fn from_values(values: &[f64]) -> Result<Self> {
        normalize(values)
    }

    pub fn trials(&self) -> &[Vec<Vec<f64>>] {
        &self.trials
    }

    pub fn trial(&self, idx: usize) -> Option<&[Vec<f64>]> {
        self.trials.get(idx).map(|t| t.as_slice())
    }

    pub fn last_trial(&self) -> &[Vec<f64>] {
        // from_trials guarantees at least one trial
        self.trials.last().map(|t| t.as_slice()).unwrap_or(&[])
    }

    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Time steps in each trial.
    pub fn trial_lengths(&self) -> Vec<usize> {
        self.trials.iter().map(|t| t.len()).collect()
    }

    /// Time steps summed over all trials.
    pub fn total_len(&self) -> usize {
        self.trials.iter().map(|t| t.len()).sum()
    }

    pub fn is_single_trial(&self) -> bool {
        self.trials.len() == 1
    }

    /// Series of one feature within one trial.
    pub fn feature_series(&self, trial: usize, feature: usize) -> Option<Vec<f64>> {
        if feature >= self.feature_count {
            return None;
        }
        self.trials
            .get(trial)
            .map(|t| t.iter().map(|step| step[feature]).collect())
    }

    /// Every value of a univariate sequence, trial by trial.
    /// Returns `None` when the sequence has more than one feature.
    pub fn univariate_trials(&self) -> Option<Vec<Vec<f64>>> {
        if self.feature_count != 1 {
            return None;
        }
        Some(
            self.trials
                .iter()
                .map(|t| t.iter().map(|step| step[0]).collect())
                .collect(),
        )
    }

    /// Iterate over all values in trial, time, feature order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.trials
            .iter()
            .flat_map(|t| t.iter().flat_map(|step| step.iter().copied()))
    }

    /// Feature-major nested form (trial → feature → time), the inverse of
    /// [`normalize`] on [`RawSequence::Trials`].
    pub fn to_feature_major(&self) -> Vec<Vec<Vec<f64>>> {
        self.trials
            .iter()
            .map(|trial| {
                (0..self.feature_count)
                    .map(|f| trial.iter().map(|step| step[f]).collect())
                    .collect()
            })
            .collect()
    }

    /// JSON rendering in feature-major nested form. Non-finite values become null.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.to_feature_major()
                .into_iter()
                .map(|trial| {
                    Value::Array(
                        trial
                            .into_iter()
                            .map(|series| {
                                Value::Array(
                                    series
                                        .into_iter()
                                        .map(|v| {
                                            serde_json::Number::from_f64(v)
                                                .map(Value::Number)
                                                .unwrap_or(Value::Null)
                                        })
                                        .collect(),
                                )
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}
