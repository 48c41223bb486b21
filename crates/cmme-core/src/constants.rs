/// Default cap on mixture components when a GMM prior is fitted from raw data.
pub const DEFAULT_GMM_MAX_COMPONENTS: usize = 10;

/// Default interval size for an unprocessed Poisson prior.
pub const DEFAULT_POISSON_D: usize = 50;

/// Default weight floor below which fitted GMM components are dropped.
pub const DEFAULT_GMM_BETA: f64 = 0.001;

/// EM iterations used when fitting a GMM prior.
pub const GMM_EM_ITERATIONS: usize = 100;

/// Ridge added to covariance diagonals so predictive scales stay positive.
pub const COVARIANCE_FLOOR: f64 = 1e-6;

/// Lowest rate a fitted Poisson prior may carry.
pub const POISSON_RATE_FLOOR: f64 = 1e-6;

/// Number of positions in each DREX prediction grid (continuous priors).
pub const PREDICTION_GRID_POINTS: usize = 100;

/// Fraction of the observed range added on both sides of the prediction grid.
pub const PREDICTION_GRID_PADDING: f64 = 0.1;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-12;

/// Tolerance used when checking that a distribution sums to one.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-9;
