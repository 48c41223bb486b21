//! DREX instruction and result files: versioned JSON records.
//!
//! Block names follow the DREX pipeline stages (`estimate_suffstat`,
//! `run_DREX_model`, `post_DREX_changedecision`, ...). JSON has no NaN, so
//! non-finite numbers are written as `null` and read back as NaN.

use std::path::{Path, PathBuf};

use cmme_core::{
    Distribution, DrexBuilder, DrexInstructions, DrexResults, FeaturePrediction, GaussianPrior,
    GmmPrior, Hazard, InputSequence, Limit, ObsNoise, PoissonPrior, Prior, UnprocessedPrior,
};
use serde::{Deserialize, Serialize};

use crate::codec::{from_nullable, from_nullable_matrix, to_nullable, to_nullable_matrix};
use crate::error::{Result, StoreError};
use crate::paths::{read_to_string, write_string};

pub const CURRENT_VERSION: &str = "1";

// --- Wire format types ---

#[derive(Serialize, Deserialize, Debug)]
pub struct WireDrexInstructions {
    pub version: String,
    /// Present only when the prior still has to be fitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_suffstat: Option<WireEstimate>,
    #[serde(rename = "run_DREX_model")]
    pub run_model: WireRunModel,
    #[serde(rename = "post_DREX_changedecision")]
    pub change_decision: WireChangeDecision,
    pub results_file_path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireEstimate {
    /// trial × time × feature
    pub xs: Vec<Vec<Vec<Option<f64>>>>,
    pub distribution: Distribution,
    #[serde(rename = "D")]
    pub d: usize,
    pub max_ncomp: Option<usize>,
    pub beta: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireRunModel {
    /// time × feature
    pub x: Vec<Vec<Option<f64>>>,
    pub distribution: Distribution,
    #[serde(rename = "D")]
    pub d: usize,
    pub hazard: WireScalarOrVec,
    pub obsnz: WireScalarOrVec,
    /// `null` means unbounded.
    pub memory: Option<usize>,
    pub maxhyp: Option<usize>,
    pub max_ncomp: Option<usize>,
    /// Sufficient statistics when the caller supplied a fitted prior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<WireSuffStat>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum WireScalarOrVec {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireChangeDecision {
    pub threshold: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum WireSuffStat {
    Gaussian {
        mu: Vec<Vec<f64>>,
        ss: Vec<Vec<Vec<f64>>>,
        n: Vec<f64>,
    },
    Gmm {
        mu: Vec<Vec<f64>>,
        sigma: Vec<Vec<f64>>,
        n: Vec<Vec<f64>>,
        pi: Vec<Vec<f64>>,
        /// Component likelihood, not scatter.
        sp: Vec<Vec<f64>>,
        k: Vec<usize>,
    },
    Poisson {
        lambda: Vec<f64>,
        n: Vec<f64>,
        #[serde(rename = "D")]
        d: usize,
    },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireDrexResults {
    pub version: String,
    /// trial × time × feature
    pub input_sequence: Vec<Vec<Vec<Option<f64>>>>,
    pub instructions_file_path: Option<String>,
    pub distribution: Distribution,
    pub estimate_suffstat_results: WireSuffStat,
    #[serde(rename = "run_DREX_model_results")]
    pub model_results: WireModelResults,
    #[serde(rename = "post_DREX_beliefdynamics_results")]
    pub belief_dynamics: Vec<Option<f64>>,
    #[serde(rename = "post_DREX_changedecision_results")]
    pub change_decision: WireChangeResults,
    #[serde(rename = "post_DREX_prediction_results")]
    pub prediction: Vec<WirePrediction>,
    pub change_decision_threshold: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireModelResults {
    pub surprisal: Vec<Vec<Option<f64>>>,
    pub joint_surprisal: Vec<Option<f64>>,
    pub context_beliefs: Vec<Vec<Option<f64>>>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireChangeResults {
    pub changepoint: Option<usize>,
    pub changeprobability: Vec<Option<f64>>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WirePrediction {
    pub prediction: Vec<Vec<Option<f64>>>,
    pub positions: Vec<f64>,
}

// --- Conversion: Domain → Wire ---

fn nullable_trials(seq: &InputSequence) -> Vec<Vec<Vec<Option<f64>>>> {
    seq.trials().iter().map(|t| to_nullable_matrix(t)).collect()
}

fn limit_to_wire(limit: Limit) -> Option<usize> {
    limit.finite()
}

fn prior_to_wire(prior: &Prior) -> Option<WireSuffStat> {
    match prior {
        Prior::Gaussian(p) | Prior::LogGaussian(p) => Some(WireSuffStat::Gaussian {
            mu: p.means().to_vec(),
            ss: p.covariance().to_vec(),
            n: p.n().to_vec(),
        }),
        Prior::Gmm(p) => Some(WireSuffStat::Gmm {
            mu: p.means().to_vec(),
            sigma: p.variance().to_vec(),
            n: p.n().to_vec(),
            pi: p.pi().to_vec(),
            sp: p.sp().to_vec(),
            k: p.k().to_vec(),
        }),
        Prior::Poisson(p) => Some(WireSuffStat::Poisson {
            lambda: p.lambda().to_vec(),
            n: p.n().to_vec(),
            d: p.d_value(),
        }),
        Prior::Unprocessed(_) => None,
    }
}

pub fn instructions_to_wire(inst: &DrexInstructions) -> WireDrexInstructions {
    let prior = inst.prior();
    let estimate_suffstat = match prior {
        Prior::Unprocessed(p) => Some(WireEstimate {
            xs: nullable_trials(p.sequence()),
            distribution: p.distribution(),
            d: p.d_value(),
            max_ncomp: p.max_components(),
            beta: p.beta(),
        }),
        _ => None,
    };
    WireDrexInstructions {
        version: CURRENT_VERSION.to_string(),
        estimate_suffstat,
        run_model: WireRunModel {
            x: to_nullable_matrix(inst.observations()),
            distribution: inst.distribution(),
            d: inst.d_value(),
            hazard: match inst.hazard() {
                Hazard::Constant(h) => WireScalarOrVec::Scalar(*h),
                Hazard::PerStep(hs) => WireScalarOrVec::Vector(hs.clone()),
            },
            obsnz: match inst.obsnz() {
                ObsNoise::Scalar(v) => WireScalarOrVec::Scalar(*v),
                ObsNoise::PerFeature(vs) => WireScalarOrVec::Vector(vs.clone()),
            },
            memory: limit_to_wire(inst.memory()),
            maxhyp: limit_to_wire(inst.maxhyp()),
            max_ncomp: inst.max_components(),
            prior: prior_to_wire(prior),
        },
        change_decision: WireChangeDecision {
            threshold: inst.change_decision_threshold(),
        },
        results_file_path: inst
            .results_file_path()
            .map(|p| p.to_string_lossy().into_owned()),
    }
}

pub fn results_to_wire(path: &Path, results: &DrexResults) -> Result<WireDrexResults> {
    let prior = prior_to_wire(&results.prior).ok_or_else(|| {
        StoreError::parse(path, "estimate_suffstat_results", "results carry an unfitted prior")
    })?;
    Ok(WireDrexResults {
        version: CURRENT_VERSION.to_string(),
        input_sequence: nullable_trials(&results.input_sequence),
        instructions_file_path: results
            .instructions_file_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        distribution: results.distribution,
        estimate_suffstat_results: prior,
        model_results: WireModelResults {
            surprisal: to_nullable_matrix(&results.surprisal),
            joint_surprisal: to_nullable(&results.joint_surprisal),
            context_beliefs: to_nullable_matrix(&results.context_beliefs),
        },
        belief_dynamics: to_nullable(&results.belief_dynamics),
        change_decision: WireChangeResults {
            changepoint: results.changepoint,
            changeprobability: to_nullable(&results.change_probability),
        },
        prediction: results
            .psi
            .iter()
            .map(|p| WirePrediction {
                prediction: to_nullable_matrix(&p.prediction),
                positions: p.positions.clone(),
            })
            .collect(),
        change_decision_threshold: results.change_decision_threshold,
    })
}

// --- Conversion: Wire → Domain ---

fn check_version(path: &Path, version: &str) -> Result<()> {
    if version != CURRENT_VERSION {
        return Err(StoreError::parse(
            path,
            "version",
            format!("unsupported version {version:?}, expected {CURRENT_VERSION:?}"),
        ));
    }
    Ok(())
}

fn sequence_from_wire(path: &Path, field: &str, trials: &[Vec<Vec<Option<f64>>>]) -> Result<InputSequence> {
    InputSequence::from_trials(trials.iter().map(|t| from_nullable_matrix(t)).collect())
        .map_err(|e| StoreError::parse(path, field, e.to_string()))
}

fn limit_from_wire(limit: Option<usize>) -> Limit {
    limit.map_or(Limit::Infinite, Limit::Finite)
}

fn prior_from_wire(path: &Path, field: &str, distribution: Distribution, wire: WireSuffStat) -> Result<Prior> {
    let prior = match (distribution, wire) {
        (Distribution::Gaussian, WireSuffStat::Gaussian { mu, ss, n }) => {
            Prior::Gaussian(GaussianPrior::new(mu, ss, n)?)
        }
        (Distribution::LogGaussian, WireSuffStat::Gaussian { mu, ss, n }) => {
            Prior::LogGaussian(GaussianPrior::new(mu, ss, n)?)
        }
        (
            Distribution::Gmm,
            WireSuffStat::Gmm {
                mu,
                sigma,
                n,
                pi,
                sp,
                k,
            },
        ) => Prior::Gmm(GmmPrior::new(mu, sigma, n, pi, sp, k)?),
        (Distribution::Poisson, WireSuffStat::Poisson { lambda, n, d }) => {
            Prior::Poisson(PoissonPrior::new(lambda, n, d)?)
        }
        (distribution, _) => {
            return Err(StoreError::parse(
                path,
                field,
                format!(
                    "sufficient statistics do not match distribution {}",
                    distribution.as_str()
                ),
            ));
        }
    };
    Ok(prior)
}

pub fn instructions_from_wire(path: &Path, wire: WireDrexInstructions) -> Result<DrexInstructions> {
    check_version(path, &wire.version)?;
    let run = wire.run_model;
    let input = sequence_from_wire(path, "run_DREX_model.x", &[run.x])?;

    let prior = match (wire.estimate_suffstat, run.prior) {
        (Some(est), _) => {
            if est.distribution != run.distribution {
                return Err(StoreError::parse(
                    path,
                    "estimate_suffstat.distribution",
                    "differs from run_DREX_model.distribution",
                ));
            }
            let seq = sequence_from_wire(path, "estimate_suffstat.xs", &est.xs)?;
            Prior::Unprocessed(UnprocessedPrior::new(
                est.distribution,
                seq,
                Some(est.d),
                est.max_ncomp,
                est.beta,
            )?)
        }
        (None, Some(stats)) => {
            prior_from_wire(path, "run_DREX_model.prior", run.distribution, stats)?
        }
        (None, None) => {
            return Err(StoreError::parse(
                path,
                "run_DREX_model.prior",
                "neither estimate_suffstat nor a fitted prior is present",
            ));
        }
    };
    if prior.d_value() != run.d {
        return Err(StoreError::parse(
            path,
            "run_DREX_model.D",
            format!("D = {} but the prior has D = {}", run.d, prior.d_value()),
        ));
    }

    let mut b = DrexBuilder::new(prior, input);
    b.hazard = match run.hazard {
        WireScalarOrVec::Scalar(h) => Hazard::Constant(h),
        WireScalarOrVec::Vector(hs) => Hazard::PerStep(hs),
    };
    b.obsnz = match run.obsnz {
        WireScalarOrVec::Scalar(v) => ObsNoise::Scalar(v),
        WireScalarOrVec::Vector(vs) => ObsNoise::PerFeature(vs),
    };
    b.memory = limit_from_wire(run.memory);
    b.maxhyp = limit_from_wire(run.maxhyp);
    b.change_decision_threshold = wire.change_decision.threshold;
    b.results_file_path = wire.results_file_path.map(PathBuf::from);
    Ok(b.to_instructions_file()?)
}

pub fn results_from_wire(path: &Path, wire: WireDrexResults) -> Result<DrexResults> {
    check_version(path, &wire.version)?;
    let prior = prior_from_wire(
        path,
        "estimate_suffstat_results",
        wire.distribution,
        wire.estimate_suffstat_results,
    )?;
    let results = DrexResults {
        prior,
        distribution: wire.distribution,
        surprisal: from_nullable_matrix(&wire.model_results.surprisal),
        joint_surprisal: from_nullable(&wire.model_results.joint_surprisal),
        context_beliefs: from_nullable_matrix(&wire.model_results.context_beliefs),
        belief_dynamics: from_nullable(&wire.belief_dynamics),
        change_probability: from_nullable(&wire.change_decision.changeprobability),
        changepoint: wire.change_decision.changepoint,
        change_decision_threshold: wire.change_decision_threshold,
        psi: wire
            .prediction
            .into_iter()
            .map(|p| FeaturePrediction {
                positions: p.positions,
                prediction: from_nullable_matrix(&p.prediction),
            })
            .collect(),
        input_sequence: sequence_from_wire(path, "input_sequence", &wire.input_sequence)?,
        instructions_file_path: wire.instructions_file_path.map(PathBuf::from),
    };
    results
        .validate()
        .map_err(|e| StoreError::parse(path, "run_DREX_model_results", e.to_string()))?;
    Ok(results)
}

// --- Files ---

pub fn write_drex_instructions(path: &Path, inst: &DrexInstructions) -> Result<()> {
    let json = serde_json::to_string_pretty(&instructions_to_wire(inst))?;
    write_string(path, &json)?;
    tracing::debug!(path = %path.display(), "wrote DREX instructions");
    Ok(())
}

pub fn read_drex_instructions(path: &Path) -> Result<DrexInstructions> {
    let wire: WireDrexInstructions = serde_json::from_str(&read_to_string(path)?)?;
    instructions_from_wire(path, wire)
}

pub fn write_drex_results(path: &Path, results: &DrexResults) -> Result<()> {
    let json = serde_json::to_string(&results_to_wire(path, results)?)?;
    write_string(path, &json)?;
    tracing::debug!(path = %path.display(), steps = results.time_steps(), "wrote DREX results");
    Ok(())
}

pub fn read_drex_results(path: &Path) -> Result<DrexResults> {
    let wire: WireDrexResults = serde_json::from_str(&read_to_string(path)?)?;
    let results = results_from_wire(path, wire)?;
    tracing::debug!(path = %path.display(), steps = results.time_steps(), "read DREX results");
    Ok(results)
}
