//! DREX prior distributions as a tagged sum.
//!
//! Each fitted arm carries exactly its sufficient statistics; the
//! `Unprocessed` arm carries raw data and is turned into a fitted arm by
//! [`crate::drex::fit_prior`].

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_GMM_BETA, DEFAULT_GMM_MAX_COMPONENTS, DEFAULT_POISSON_D};
use crate::error::{ModelError, Result};
use crate::sequence::InputSequence;

/// Parametric family a prior (or its fitting request) belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Gaussian,
    #[serde(rename = "lognormal")]
    LogGaussian,
    Gmm,
    Poisson,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Gaussian => "gaussian",
            Distribution::LogGaussian => "lognormal",
            Distribution::Gmm => "gmm",
            Distribution::Poisson => "poisson",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "gaussian" => Some(Distribution::Gaussian),
            "lognormal" | "loggaussian" => Some(Distribution::LogGaussian),
            "gmm" => Some(Distribution::Gmm),
            "poisson" => Some(Distribution::Poisson),
            _ => None,
        }
    }
}

/// Sufficient statistics of a (log-)Gaussian prior over windows of D steps.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianPrior {
    means: Vec<Vec<f64>>,
    covariance: Vec<Vec<Vec<f64>>>,
    n: Vec<f64>,
}

impl GaussianPrior {
    /// `means` is F×D, `covariance` F×D×D, `n` has one count per feature.
    pub fn new(means: Vec<Vec<f64>>, covariance: Vec<Vec<Vec<f64>>>, n: Vec<f64>) -> Result<Self> {
        let f = means.len();
        if f == 0 {
            return Err(ModelError::params("gaussian prior needs at least one feature"));
        }
        let d = means[0].len();
        if d == 0 {
            return Err(ModelError::params("gaussian prior D must be at least 1"));
        }
        if means.iter().any(|m| m.len() != d) {
            return Err(ModelError::params("gaussian means must all have length D"));
        }
        if covariance.len() != f {
            return Err(ModelError::params(format!(
                "gaussian covariance has {} features, means have {f}",
                covariance.len()
            )));
        }
        for (i, cov) in covariance.iter().enumerate() {
            if cov.len() != d || cov.iter().any(|row| row.len() != d) {
                return Err(ModelError::params(format!(
                    "gaussian covariance for feature {i} must be {d}x{d}"
                )));
            }
        }
        if n.len() != f {
            return Err(ModelError::params(format!(
                "gaussian n has {} entries, expected {f}",
                n.len()
            )));
        }
        if n.iter().any(|&v| !(v > 0.0)) {
            return Err(ModelError::params("gaussian n must be positive"));
        }
        let all_finite = means.iter().flatten().all(|v| v.is_finite())
            && covariance.iter().flatten().flatten().all(|v| v.is_finite());
        if !all_finite {
            return Err(ModelError::params("gaussian statistics must be finite"));
        }
        Ok(Self {
            means,
            covariance,
            n,
        })
    }

    pub fn means(&self) -> &[Vec<f64>] {
        &self.means
    }

    pub fn covariance(&self) -> &[Vec<Vec<f64>>] {
        &self.covariance
    }

    pub fn n(&self) -> &[f64] {
        &self.n
    }

    pub fn feature_count(&self) -> usize {
        self.means.len()
    }

    pub fn d_value(&self) -> usize {
        self.means[0].len()
    }
}

/// One Gaussian mixture per feature. D is always 1.
#[derive(Clone, Debug, PartialEq)]
pub struct GmmPrior {
    means: Vec<Vec<f64>>,
    variance: Vec<Vec<f64>>,
    n: Vec<Vec<f64>>,
    pi: Vec<Vec<f64>>,
    sp: Vec<Vec<f64>>,
    k: Vec<usize>,
}

impl GmmPrior {
    /// Every matrix is F×K; `k` gives the number of active components per feature.
    pub fn new(
        means: Vec<Vec<f64>>,
        variance: Vec<Vec<f64>>,
        n: Vec<Vec<f64>>,
        pi: Vec<Vec<f64>>,
        sp: Vec<Vec<f64>>,
        k: Vec<usize>,
    ) -> Result<Self> {
        let f = means.len();
        if f == 0 {
            return Err(ModelError::params("gmm prior needs at least one feature"));
        }
        let width = means[0].len();
        if width == 0 {
            return Err(ModelError::params("gmm prior needs at least one component"));
        }
        for (name, m) in [
            ("means", &means),
            ("variance", &variance),
            ("n", &n),
            ("pi", &pi),
            ("sp", &sp),
        ] {
            if m.len() != f || m.iter().any(|row| row.len() != width) {
                return Err(ModelError::params(format!(
                    "gmm {name} must be {f}x{width}"
                )));
            }
        }
        if k.len() != f {
            return Err(ModelError::params(format!(
                "gmm k has {} entries, expected {f}",
                k.len()
            )));
        }
        if k.iter().any(|&kk| kk == 0 || kk > width) {
            return Err(ModelError::params(format!(
                "gmm active component counts must be in 1..={width}"
            )));
        }
        for (feat, &kk) in k.iter().enumerate() {
            if variance[feat][..kk].iter().any(|&v| !(v > 0.0)) {
                return Err(ModelError::params("gmm variances must be positive"));
            }
            if pi[feat][..kk].iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                return Err(ModelError::params("gmm weights must lie in [0, 1]"));
            }
        }
        Ok(Self {
            means,
            variance,
            n,
            pi,
            sp,
            k,
        })
    }

    pub fn means(&self) -> &[Vec<f64>] {
        &self.means
    }

    pub fn variance(&self) -> &[Vec<f64>] {
        &self.variance
    }

    pub fn n(&self) -> &[Vec<f64>] {
        &self.n
    }

    pub fn pi(&self) -> &[Vec<f64>] {
        &self.pi
    }

    /// Per-component likelihood of the fitting data.
    pub fn sp(&self) -> &[Vec<f64>] {
        &self.sp
    }

    pub fn k(&self) -> &[usize] {
        &self.k
    }

    pub fn feature_count(&self) -> usize {
        self.means.len()
    }

    /// Width of the component matrices (maximum K).
    pub fn max_components(&self) -> usize {
        self.means[0].len()
    }
}

/// Gamma–Poisson prior; D is the interval size.
#[derive(Clone, Debug, PartialEq)]
pub struct PoissonPrior {
    lambda: Vec<f64>,
    n: Vec<f64>,
    d: usize,
}

impl PoissonPrior {
    pub fn new(lambda: Vec<f64>, n: Vec<f64>, d: usize) -> Result<Self> {
        if lambda.is_empty() {
            return Err(ModelError::params("poisson prior needs at least one feature"));
        }
        if n.len() != lambda.len() {
            return Err(ModelError::params(format!(
                "poisson n has {} entries, lambda has {}",
                n.len(),
                lambda.len()
            )));
        }
        if d == 0 {
            return Err(ModelError::params("poisson D must be at least 1"));
        }
        if lambda.iter().any(|&l| !(l > 0.0) || !l.is_finite()) {
            return Err(ModelError::params("poisson lambda must be positive and finite"));
        }
        if n.iter().any(|&v| !(v > 0.0)) {
            return Err(ModelError::params("poisson n must be positive"));
        }
        Ok(Self { lambda, n, d })
    }

    pub fn lambda(&self) -> &[f64] {
        &self.lambda
    }

    pub fn n(&self) -> &[f64] {
        &self.n
    }

    pub fn feature_count(&self) -> usize {
        self.lambda.len()
    }

    pub fn d_value(&self) -> usize {
        self.d
    }
}

/// Raw data the backend fits a prior from on first use.
#[derive(Clone, Debug, PartialEq)]
pub struct UnprocessedPrior {
    distribution: Distribution,
    sequence: InputSequence,
    d: usize,
    max_components: Option<usize>,
    beta: Option<f64>,
}

impl UnprocessedPrior {
    /// `d` defaults to 1, or to 50 for Poisson. GMM requires D = 1 and
    /// defaults `max_components` to 10.
    pub fn new(
        distribution: Distribution,
        sequence: InputSequence,
        d: Option<usize>,
        max_components: Option<usize>,
        beta: Option<f64>,
    ) -> Result<Self> {
        let d = d.unwrap_or(match distribution {
            Distribution::Poisson => DEFAULT_POISSON_D,
            _ => 1,
        });
        if d == 0 {
            return Err(ModelError::params("prior D must be at least 1"));
        }
        let (max_components, beta) = match distribution {
            Distribution::Gmm => {
                if d != 1 {
                    return Err(ModelError::params("gmm prior requires D = 1"));
                }
                let max = max_components.unwrap_or(DEFAULT_GMM_MAX_COMPONENTS);
                if max == 0 {
                    return Err(ModelError::params("gmm max components must be at least 1"));
                }
                let beta = beta.unwrap_or(DEFAULT_GMM_BETA);
                if !(beta > 0.0 && beta < 1.0) {
                    return Err(ModelError::params("gmm beta must lie in (0, 1)"));
                }
                (Some(max), Some(beta))
            }
            _ => (max_components, beta),
        };
        if let Some(short) = sequence.trial_lengths().iter().position(|&len| len < d) {
            return Err(ModelError::params(format!(
                "prior trial {short} is shorter than D = {d}"
            )));
        }
        match distribution {
            Distribution::LogGaussian if sequence.values().any(|v| !(v > 0.0)) => {
                return Err(ModelError::params(
                    "lognormal prior data must be strictly positive",
                ));
            }
            Distribution::Poisson if sequence.values().any(|v| !(v >= 0.0)) => {
                return Err(ModelError::params("poisson prior data must be non-negative"));
            }
            _ => {}
        }
        Ok(Self {
            distribution,
            sequence,
            d,
            max_components,
            beta,
        })
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn sequence(&self) -> &InputSequence {
        &self.sequence
    }

    pub fn d_value(&self) -> usize {
        self.d
    }

    pub fn max_components(&self) -> Option<usize> {
        self.max_components
    }

    pub fn beta(&self) -> Option<f64> {
        self.beta
    }

    pub fn feature_count(&self) -> usize {
        self.sequence.feature_count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Prior {
    Gaussian(GaussianPrior),
    LogGaussian(GaussianPrior),
    Gmm(GmmPrior),
    Poisson(PoissonPrior),
    Unprocessed(UnprocessedPrior),
}

impl Prior {
    pub fn feature_count(&self) -> usize {
        match self {
            Prior::Gaussian(p) | Prior::LogGaussian(p) => p.feature_count(),
            Prior::Gmm(p) => p.feature_count(),
            Prior::Poisson(p) => p.feature_count(),
            Prior::Unprocessed(p) => p.feature_count(),
        }
    }

    pub fn d_value(&self) -> usize {
        match self {
            Prior::Gaussian(p) | Prior::LogGaussian(p) => p.d_value(),
            Prior::Gmm(_) => 1,
            Prior::Poisson(p) => p.d_value(),
            Prior::Unprocessed(p) => p.d_value(),
        }
    }

    /// Distribution family; for `Unprocessed`, the family it will be fitted as.
    pub fn distribution(&self) -> Distribution {
        match self {
            Prior::Gaussian(_) => Distribution::Gaussian,
            Prior::LogGaussian(_) => Distribution::LogGaussian,
            Prior::Gmm(_) => Distribution::Gmm,
            Prior::Poisson(_) => Distribution::Poisson,
            Prior::Unprocessed(p) => p.distribution(),
        }
    }

    pub fn is_unprocessed(&self) -> bool {
        matches!(self, Prior::Unprocessed(_))
    }

    /// Maximum mixture components, when meaningful.
    pub fn max_components(&self) -> Option<usize> {
        match self {
            Prior::Gmm(p) => Some(p.max_components()),
            Prior::Unprocessed(p) => p.max_components(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::normalize;

    fn identity(d: usize) -> Vec<Vec<f64>> {
        (0..d)
            .map(|i| (0..d).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn test_gaussian_dimensions() {
        let p = GaussianPrior::new(
            vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            vec![identity(2), identity(2)],
            vec![3.0, 3.0],
        )
        .unwrap();
        assert_eq!(p.feature_count(), 2);
        assert_eq!(p.d_value(), 2);
        let prior = Prior::Gaussian(p);
        assert_eq!(prior.feature_count(), 2);
        assert_eq!(prior.d_value(), 2);
    }

    #[test]
    fn test_gaussian_covariance_mismatch() {
        let err = GaussianPrior::new(vec![vec![0.0, 0.0]], vec![identity(3)], vec![1.0]);
        assert!(matches!(err, Err(ModelError::InvalidParameters(_))));
    }

    #[test]
    fn test_gaussian_n_length_mismatch() {
        let err = GaussianPrior::new(vec![vec![0.0]], vec![identity(1)], vec![1.0, 2.0]);
        assert!(err.is_err());
    }

    #[test]
    fn test_gmm_shapes() {
        let row = vec![0.5, 0.5];
        let p = GmmPrior::new(
            vec![vec![0.0, 1.0]],
            vec![vec![1.0, 1.0]],
            vec![vec![5.0, 5.0]],
            vec![row.clone()],
            vec![row],
            vec![2],
        )
        .unwrap();
        assert_eq!(Prior::Gmm(p).d_value(), 1);
    }

    #[test]
    fn test_gmm_bad_k() {
        let row = vec![1.0];
        let err = GmmPrior::new(
            vec![row.clone()],
            vec![row.clone()],
            vec![row.clone()],
            vec![row.clone()],
            vec![row],
            vec![2],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_poisson_validation() {
        assert!(PoissonPrior::new(vec![2.0], vec![10.0], 50).is_ok());
        assert!(PoissonPrior::new(vec![2.0], vec![10.0], 0).is_err());
        assert!(PoissonPrior::new(vec![-1.0], vec![10.0], 5).is_err());
        assert!(PoissonPrior::new(vec![1.0, 2.0], vec![10.0], 5).is_err());
    }

    #[test]
    fn test_unprocessed_defaults() {
        let seq = normalize((0..60).map(|v| (v % 4) as f64).collect::<Vec<_>>()).unwrap();
        let poisson =
            UnprocessedPrior::new(Distribution::Poisson, seq.clone(), None, None, None).unwrap();
        assert_eq!(poisson.d_value(), 50);

        let gmm = UnprocessedPrior::new(Distribution::Gmm, seq, None, None, None).unwrap();
        assert_eq!(gmm.max_components(), Some(10));
        assert_eq!(gmm.d_value(), 1);
    }

    #[test]
    fn test_unprocessed_gmm_requires_d_one() {
        let seq = normalize(vec![1.0, 2.0, 3.0]).unwrap();
        let err = UnprocessedPrior::new(Distribution::Gmm, seq.clone(), Some(2), None, None);
        assert!(err.is_err());
        let err = UnprocessedPrior::new(Distribution::Gmm, seq, None, Some(0), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_unprocessed_requires_d_steps() {
        let seq = normalize(vec![1.0, 1.0, 1.5, 2.0]).unwrap();
        assert!(
            UnprocessedPrior::new(Distribution::Gaussian, seq.clone(), Some(2), None, None)
                .is_ok()
        );
        assert!(UnprocessedPrior::new(Distribution::Gaussian, seq, Some(5), None, None).is_err());
    }

    #[test]
    fn test_unprocessed_lognormal_positive() {
        let seq = normalize(vec![1.0, 0.0, 2.0]).unwrap();
        assert!(UnprocessedPrior::new(Distribution::LogGaussian, seq, None, None, None).is_err());
    }

    #[test]
    fn test_distribution_tags() {
        for d in [
            Distribution::Gaussian,
            Distribution::LogGaussian,
            Distribution::Gmm,
            Distribution::Poisson,
        ] {
            assert_eq!(Distribution::from_tag(d.as_str()), Some(d));
        }
        assert_eq!(Distribution::from_tag("cauchy"), None);
    }
}
