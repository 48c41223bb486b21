//! Variable-order Markov (PPM) instances.
//!
//! Two variants share a base of alphabet, order bound and input sequence:
//! SIMPLE is plain PPM with a choice of escape method; DECAY adds buffer,
//! short-term and long-term memory traces whose weights decay with time.

pub mod engine;
pub mod results;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{ModelError, Result};
use crate::sequence::InputSequence;

pub use engine::run_ppm;
pub use results::{PpmEvent, PpmResults};

/// Ordered set of distinct symbols. Order defines distribution indexing.
#[derive(Clone, Debug)]
pub struct Alphabet {
    levels: Vec<f64>,
    index: HashMap<u64, usize>,
}

impl PartialEq for Alphabet {
    fn eq(&self, other: &Self) -> bool {
        self.levels.len() == other.levels.len()
            && self
                .levels
                .iter()
                .zip(&other.levels)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Alphabet {
    pub fn new(levels: Vec<f64>) -> Result<Self> {
        if levels.is_empty() {
            return Err(ModelError::params("alphabet is empty"));
        }
        let mut index = HashMap::with_capacity(levels.len());
        for (i, &level) in levels.iter().enumerate() {
            if !level.is_finite() {
                return Err(ModelError::params(format!(
                    "alphabet symbol {level} is not finite"
                )));
            }
            if index.insert(canonical_bits(level), i).is_some() {
                return Err(ModelError::params(format!(
                    "alphabet symbol {level} appears more than once"
                )));
            }
        }
        Ok(Self { levels, index })
    }

    /// Sorted distinct values of a sequence.
    pub fn infer(sequence: &InputSequence) -> Result<Self> {
        let mut levels: Vec<f64> = sequence.values().collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup_by(|a, b| canonical_bits(*a) == canonical_bits(*b));
        Self::new(levels)
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn index_of(&self, symbol: f64) -> Option<usize> {
        self.index.get(&canonical_bits(symbol)).copied()
    }

    pub fn contains(&self, symbol: f64) -> bool {
        self.index_of(symbol).is_some()
    }
}

// -0.0 and 0.0 name the same symbol
fn canonical_bits(v: f64) -> u64 {
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

/// Probability-mass reservation scheme for unseen symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EscapeMethod {
    A,
    B,
    #[default]
    C,
    D,
    AX,
}

impl EscapeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscapeMethod::A => "a",
            EscapeMethod::B => "b",
            EscapeMethod::C => "c",
            EscapeMethod::D => "d",
            EscapeMethod::AX => "ax",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "a" => Some(EscapeMethod::A),
            "b" => Some(EscapeMethod::B),
            "c" => Some(EscapeMethod::C),
            "d" => Some(EscapeMethod::D),
            "ax" => Some(EscapeMethod::AX),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpmModelType {
    Simple,
    Decay,
}

impl PpmModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PpmModelType::Simple => "SIMPLE",
            PpmModelType::Decay => "DECAY",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "SIMPLE" => Some(PpmModelType::Simple),
            "DECAY" => Some(PpmModelType::Decay),
            _ => None,
        }
    }
}

impl fmt::Display for PpmModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options specific to the SIMPLE variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimpleOptions {
    pub shortest_deterministic: bool,
    pub exclusion: bool,
    pub update_exclusion: bool,
    pub escape: EscapeMethod,
}

/// Options specific to the DECAY variant.
#[derive(Clone, Debug, PartialEq)]
pub struct DecayOptions {
    /// One time series per trial, same lengths as the input trials.
    pub input_time_sequence: Vec<Vec<f64>>,
    pub buffer_weight: f64,
    pub buffer_length_time: f64,
    pub buffer_length_items: usize,
    pub stm_weight: f64,
    pub stm_duration: f64,
    pub only_learn_from_buffer: bool,
    pub only_predict_from_buffer: bool,
    pub ltm_weight: f64,
    pub ltm_half_life: f64,
    pub ltm_asymptote: f64,
    pub noise: f64,
    pub seed: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PpmVariant {
    Simple(SimpleOptions),
    Decay(DecayOptions),
}

/// Immutable snapshot of a PPM configuration, ready to be written to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct PpmInstructions {
    alphabet: Alphabet,
    order_bound: usize,
    input_sequence: InputSequence,
    results_file_path: Option<PathBuf>,
    variant: PpmVariant,
}

impl PpmInstructions {
    pub fn model_type(&self) -> PpmModelType {
        match self.variant {
            PpmVariant::Simple(_) => PpmModelType::Simple,
            PpmVariant::Decay(_) => PpmModelType::Decay,
        }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn order_bound(&self) -> usize {
        self.order_bound
    }

    pub fn input_sequence(&self) -> &InputSequence {
        &self.input_sequence
    }

    pub fn results_file_path(&self) -> Option<&PathBuf> {
        self.results_file_path.as_ref()
    }

    pub fn variant(&self) -> &PpmVariant {
        &self.variant
    }

    /// Copy with the results path replaced; used when the orchestrator mints paths.
    pub fn with_results_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_file_path = Some(path.into());
        self
    }

    /// Input symbols per trial as alphabet indices.
    pub(crate) fn symbol_indices(&self) -> Vec<Vec<usize>> {
        self.input_sequence
            .trials()
            .iter()
            .map(|trial| {
                trial
                    .iter()
                    .filter_map(|step| self.alphabet.index_of(step[0]))
                    .collect()
            })
            .collect()
    }
}

/// Shared validation: univariate input whose symbols all belong to the alphabet.
fn check_base(
    input_sequence: &InputSequence,
    alphabet_levels: Option<&[f64]>,
) -> Result<Alphabet> {
    if input_sequence.feature_count() != 1 {
        return Err(ModelError::params(format!(
            "PPM input must have exactly one feature, got {}",
            input_sequence.feature_count()
        )));
    }
    let alphabet = match alphabet_levels {
        Some(levels) => Alphabet::new(levels.to_vec())?,
        None => Alphabet::infer(input_sequence)?,
    };
    if let Some(symbol) = input_sequence.values().find(|&v| !alphabet.contains(v)) {
        return Err(ModelError::params(format!(
            "input symbol {symbol} is not in the alphabet"
        )));
    }
    Ok(alphabet)
}

/// Mutable configuration for a SIMPLE PPM model.
///
/// Defaults: order bound 10, escape C, shortest-deterministic, exclusion and
/// update exclusion all enabled. A missing alphabet is inferred from the input.
#[derive(Clone, Debug)]
pub struct PpmSimpleBuilder {
    pub input_sequence: InputSequence,
    pub alphabet_levels: Option<Vec<f64>>,
    pub order_bound: usize,
    pub shortest_deterministic: bool,
    pub exclusion: bool,
    pub update_exclusion: bool,
    pub escape: EscapeMethod,
    pub results_file_path: Option<PathBuf>,
}

impl PpmSimpleBuilder {
    pub fn new(input_sequence: InputSequence) -> Self {
        Self {
            input_sequence,
            alphabet_levels: None,
            order_bound: 10,
            shortest_deterministic: true,
            exclusion: true,
            update_exclusion: true,
            escape: EscapeMethod::C,
            results_file_path: None,
        }
    }

    pub fn alphabet(mut self, levels: Vec<f64>) -> Self {
        self.alphabet_levels = Some(levels);
        self
    }

    pub fn order_bound(mut self, order_bound: usize) -> Self {
        self.order_bound = order_bound;
        self
    }

    pub fn escape(mut self, escape: EscapeMethod) -> Self {
        self.escape = escape;
        self
    }

    pub fn to_instructions_file(&self) -> Result<PpmInstructions> {
        let alphabet = check_base(&self.input_sequence, self.alphabet_levels.as_deref())?;
        Ok(PpmInstructions {
            alphabet,
            order_bound: self.order_bound,
            input_sequence: self.input_sequence.clone(),
            results_file_path: self.results_file_path.clone(),
            variant: PpmVariant::Simple(SimpleOptions {
                shortest_deterministic: self.shortest_deterministic,
                exclusion: self.exclusion,
                update_exclusion: self.update_exclusion,
                escape: self.escape,
            }),
        })
    }
}

/// Mutable configuration for a DECAY PPM model.
///
/// Defaults reproduce a non-decaying model: all weights 1, effectively
/// unbounded buffer and half-life, no noise.
#[derive(Clone, Debug)]
pub struct PpmDecayBuilder {
    pub input_sequence: InputSequence,
    pub input_time_sequence: Option<Vec<Vec<f64>>>,
    pub alphabet_levels: Option<Vec<f64>>,
    pub order_bound: usize,
    pub buffer_weight: f64,
    pub buffer_length_time: f64,
    pub buffer_length_items: usize,
    pub stm_weight: f64,
    pub stm_duration: f64,
    pub only_learn_from_buffer: bool,
    pub only_predict_from_buffer: bool,
    pub ltm_weight: f64,
    pub ltm_half_life: f64,
    pub ltm_asymptote: f64,
    pub noise: f64,
    pub seed: u64,
    pub results_file_path: Option<PathBuf>,
}

impl PpmDecayBuilder {
    pub fn new(input_sequence: InputSequence) -> Self {
        Self {
            input_sequence,
            input_time_sequence: None,
            alphabet_levels: None,
            order_bound: 10,
            buffer_weight: 1.0,
            buffer_length_time: 999_999.0,
            buffer_length_items: 999_999,
            stm_weight: 1.0,
            stm_duration: 0.0,
            only_learn_from_buffer: false,
            only_predict_from_buffer: false,
            ltm_weight: 1.0,
            ltm_half_life: 1e60,
            ltm_asymptote: 0.0,
            noise: 0.0,
            seed: 1,
            results_file_path: None,
        }
    }

    pub fn alphabet(mut self, levels: Vec<f64>) -> Self {
        self.alphabet_levels = Some(levels);
        self
    }

    pub fn order_bound(mut self, order_bound: usize) -> Self {
        self.order_bound = order_bound;
        self
    }

    /// Time stamps for a single-trial input.
    pub fn times(mut self, times: Vec<f64>) -> Self {
        self.input_time_sequence = Some(vec![times]);
        self
    }

    fn check_weights(&self) -> Result<()> {
        let finite_non_negative = [
            ("buffer_weight", self.buffer_weight),
            ("buffer_length_time", self.buffer_length_time),
            ("stm_weight", self.stm_weight),
            ("stm_duration", self.stm_duration),
            ("ltm_weight", self.ltm_weight),
            ("ltm_asymptote", self.ltm_asymptote),
            ("noise", self.noise),
        ];
        for (name, value) in finite_non_negative {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ModelError::params(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(self.buffer_weight >= self.stm_weight && self.stm_weight >= self.ltm_weight) {
            return Err(ModelError::params(format!(
                "weights must satisfy buffer ({}) >= stm ({}) >= ltm ({})",
                self.buffer_weight, self.stm_weight, self.ltm_weight
            )));
        }
        if !(self.ltm_half_life > 0.0) {
            return Err(ModelError::params("ltm_half_life must be positive"));
        }
        if self.ltm_asymptote > self.ltm_weight {
            return Err(ModelError::params(format!(
                "ltm_asymptote ({}) must not exceed ltm_weight ({})",
                self.ltm_asymptote, self.ltm_weight
            )));
        }
        Ok(())
    }

    fn time_sequence(&self) -> Result<Vec<Vec<f64>>> {
        let lengths = self.input_sequence.trial_lengths();
        let Some(times) = &self.input_time_sequence else {
            return Ok(lengths
                .iter()
                .map(|&n| (0..n).map(|t| t as f64).collect())
                .collect());
        };
        if times.len() != lengths.len() {
            return Err(ModelError::params(format!(
                "time sequence has {} trials, input has {}",
                times.len(),
                lengths.len()
            )));
        }
        for (i, (trial, &n)) in times.iter().zip(&lengths).enumerate() {
            if trial.len() != n {
                return Err(ModelError::params(format!(
                    "time sequence for trial {i} has {} entries, input has {n}",
                    trial.len()
                )));
            }
            if trial.iter().any(|t| !t.is_finite()) {
                return Err(ModelError::params("time stamps must be finite"));
            }
            if trial.windows(2).any(|w| w[1] < w[0]) {
                return Err(ModelError::params(format!(
                    "time sequence for trial {i} must be non-decreasing"
                )));
            }
        }
        Ok(times.clone())
    }

    pub fn to_instructions_file(&self) -> Result<PpmInstructions> {
        let alphabet = check_base(&self.input_sequence, self.alphabet_levels.as_deref())?;
        self.check_weights()?;
        let input_time_sequence = self.time_sequence()?;
        Ok(PpmInstructions {
            alphabet,
            order_bound: self.order_bound,
            input_sequence: self.input_sequence.clone(),
            results_file_path: self.results_file_path.clone(),
            variant: PpmVariant::Decay(DecayOptions {
                input_time_sequence,
                buffer_weight: self.buffer_weight,
                buffer_length_time: self.buffer_length_time,
                buffer_length_items: self.buffer_length_items,
                stm_weight: self.stm_weight,
                stm_duration: self.stm_duration,
                only_learn_from_buffer: self.only_learn_from_buffer,
                only_predict_from_buffer: self.only_predict_from_buffer,
                ltm_weight: self.ltm_weight,
                ltm_half_life: self.ltm_half_life,
                ltm_asymptote: self.ltm_asymptote,
                noise: self.noise,
                seed: self.seed,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::normalize;

    fn seq() -> InputSequence {
        normalize(vec![1.0, 1.0, 3.0, 2.0, 5.0, 5.0, 1.0, 3.0]).unwrap()
    }

    #[test]
    fn test_alphabet_views_agree() {
        let a = Alphabet::new(vec![1.0, 2.0, 3.0, 5.0]).unwrap();
        for (i, &level) in a.levels().iter().enumerate() {
            assert_eq!(a.index_of(level), Some(i));
        }
        assert!(!a.contains(4.0));
    }

    #[test]
    fn test_alphabet_rejects_duplicates_and_empty() {
        assert!(Alphabet::new(vec![1.0, 1.0]).is_err());
        assert!(Alphabet::new(vec![]).is_err());
        assert!(Alphabet::new(vec![0.0, -0.0]).is_err());
    }

    #[test]
    fn test_inferred_alphabet_is_sorted() {
        let a = Alphabet::infer(&seq()).unwrap();
        assert_eq!(a.levels(), &[1.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_simple_builder() {
        let inst = PpmSimpleBuilder::new(seq())
            .alphabet(vec![1.0, 2.0, 3.0, 5.0])
            .order_bound(3)
            .to_instructions_file()
            .unwrap();
        assert_eq!(inst.model_type(), PpmModelType::Simple);
        assert_eq!(inst.order_bound(), 3);
        assert_eq!(inst.symbol_indices(), vec![vec![0, 0, 2, 1, 3, 3, 0, 2]]);
    }

    #[test]
    fn test_symbol_outside_alphabet() {
        let err = PpmSimpleBuilder::new(seq())
            .alphabet(vec![1.0, 2.0, 3.0])
            .to_instructions_file()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameters(_)));
    }

    #[test]
    fn test_empty_alphabet() {
        let err = PpmSimpleBuilder::new(seq())
            .alphabet(vec![])
            .to_instructions_file()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameters(_)));
    }

    #[test]
    fn test_multi_feature_rejected() {
        let multi = normalize(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert!(PpmSimpleBuilder::new(multi).to_instructions_file().is_err());
    }

    #[test]
    fn test_decay_default_times() {
        let inst = PpmDecayBuilder::new(seq()).to_instructions_file().unwrap();
        let PpmVariant::Decay(opts) = inst.variant() else {
            panic!("expected decay variant");
        };
        assert_eq!(
            opts.input_time_sequence,
            vec![vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]]
        );
    }

    #[test]
    fn test_decay_weight_ordering() {
        let mut b = PpmDecayBuilder::new(seq());
        b.stm_weight = 2.0;
        assert!(matches!(
            b.to_instructions_file(),
            Err(ModelError::InvalidParameters(_))
        ));

        let mut b = PpmDecayBuilder::new(seq());
        b.ltm_asymptote = 2.0;
        assert!(b.to_instructions_file().is_err());

        let mut b = PpmDecayBuilder::new(seq());
        b.ltm_half_life = 0.0;
        assert!(b.to_instructions_file().is_err());
    }

    #[test]
    fn test_decay_time_length_mismatch() {
        let b = PpmDecayBuilder::new(seq()).times(vec![0.0, 1.0]);
        assert!(b.to_instructions_file().is_err());
    }

    #[test]
    fn test_decay_times_must_not_decrease() {
        let b = PpmDecayBuilder::new(seq()).times(vec![0.0, 1.0, 2.0, 1.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(b.to_instructions_file().is_err());
    }

    #[test]
    fn test_escape_tags() {
        for e in [
            EscapeMethod::A,
            EscapeMethod::B,
            EscapeMethod::C,
            EscapeMethod::D,
            EscapeMethod::AX,
        ] {
            assert_eq!(EscapeMethod::from_tag(e.as_str()), Some(e));
        }
        assert_eq!(EscapeMethod::from_tag("AX"), Some(EscapeMethod::AX));
    }
}
