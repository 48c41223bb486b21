//! Model layer for comparing three sequential predictors over symbolic and
//! numeric event streams.
//!
//! PPM is a variable-order Markov model with optional memory decay, DREX a
//! Bayesian online change-point predictor over parametric priors, and IDyOM a
//! multi-viewpoint long/short-term Markov mixture. This crate holds the input
//! normalizer, priors, builders, instruction and result values, the
//! aggregator, and native reference engines for PPM and DREX.
//!
//! Zero I/O: file codecs live in `cmme-store`, process management in
//! `cmme-backend`.

pub mod aggregate;
pub mod constants;
pub mod drex;
pub mod error;
pub mod idyom;
pub mod ppm;
pub mod prior;
pub mod sequence;
pub mod stats;

pub use aggregate::{AggregateFrame, AggregateRow, AlignmentPolicy, aggregate};
pub use drex::{
    DrexBuilder, DrexInstructions, DrexResults, FeaturePrediction, Hazard, Limit, ObsNoise,
    fit_prior, run_drex,
};
pub use error::{ModelError, Result};
pub use idyom::{
    IdyomBuilder, IdyomInstructions, IdyomResults, IdyomTarget, ModelKind, Viewpoint,
};
pub use ppm::{
    Alphabet, DecayOptions, EscapeMethod, PpmDecayBuilder, PpmEvent, PpmInstructions,
    PpmModelType, PpmResults, PpmSimpleBuilder, PpmVariant, SimpleOptions, run_ppm,
};
pub use prior::{Distribution, GaussianPrior, GmmPrior, PoissonPrior, Prior, UnprocessedPrior};
pub use sequence::{InputSequence, RawSequence, normalize};
