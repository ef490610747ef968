use crate::sampler::Sampler;
use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every fallible function in the public Rust API returns
/// `Result<T, CobarsError>` instead of panicking.  Numerical failures of
/// *individual samples* inside a batch are deliberately not errors: the
/// driver records them with a sampling weight of zero so that one bad
/// sample cannot poison a whole Monte-Carlo run.
#[derive(Debug)]
pub enum CobarsError {
    /// Invalid argument detected at call entry (edge count < 2,
    /// non-positive edge lengths or quotient weights, empty or inverted
    /// binning ranges, shape mismatches, …).
    InvalidInput(String),
    /// A Cholesky pivot was ≤ 0: the regularised Hessian (or a weight
    /// matrix) is not positive definite.
    NonPositiveDefinite { pivot: usize },
    /// Functionality gated on the ambient dimension was requested in an
    /// unsupported dimension.
    DimensionUnsupported { required: usize, actual: usize },
    /// The worker pool for a batch call could not be built.
    ThreadPool(String),
}

impl fmt::Display for CobarsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::NonPositiveDefinite { pivot } =>
                write!(f, "matrix not positive definite (pivot {pivot} is not > 0)"),
            Self::DimensionUnsupported { required, actual } =>
                write!(f, "requires ambient dimension {required}, got {actual}"),
            Self::ThreadPool(msg) => write!(f, "thread pool error: {msg}"),
        }
    }
}

impl std::error::Error for CobarsError {}

impl From<rayon::ThreadPoolBuildError> for CobarsError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────
//  Floating-point guard constants
// ─────────────────────────────────────────────────────────────

/// 1 − 16ε: squared norms above this are treated as lying outside the
/// usable open unit ball.
pub(crate) const SMALL_ONE: f64 = 1.0 - 16.0 * f64::EPSILON;

/// 1 + 16ε: used in denominators where an exact 1 could flip sign under
/// round-off.
pub(crate) const BIG_ONE: f64 = 1.0 + 16.0 * f64::EPSILON;

/// 0.99² + 16ε: squared-norm threshold on the shift vector beyond which
/// shifted directions are renormalised back onto the unit sphere.
pub(crate) const NORM_THRESHOLD: f64 = 0.99 * 0.99 + 16.0 * f64::EPSILON;

// ─────────────────────────────────────────────────────────────
//  Solver settings
// ─────────────────────────────────────────────────────────────

/// Tuning knobs of the per-sample Newton solver.
///
/// The defaults are chosen for double precision; all samples of a batch
/// share one `Settings` value.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Success threshold on the Kantorovich error estimator.
    pub tolerance: f64,
    /// Residual below which an ill-conditioned solve stops and is
    /// reported as best-effort.
    pub give_up_tolerance: f64,
    /// Scale of the Hessian regularisation `c·I`, with
    /// `c = regularization · residual²`.  Non-negative.
    pub regularization: f64,
    /// Cap on outer Newton iterations.
    pub max_iter: usize,
    /// Armijo sufficient-decrease factor σ.
    pub armijo_slope_factor: f64,
    /// Back-tracking shrink factor γ ∈ (0, 1).
    pub armijo_shrink_factor: f64,
    /// Cap on back-tracking steps per line search.
    pub max_backtrackings: usize,
    /// Global toggle for the Armijo line search.
    pub use_linesearch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            give_up_tolerance: 1e-13,
            regularization: 1.0,
            max_iter: 1000,
            armijo_slope_factor: 0.01,
            armijo_shrink_factor: 0.5,
            max_backtrackings: 20,
            use_linesearch: true,
        }
    }
}

impl Settings {
    /// Check that all knobs lie in their admissible ranges.
    pub fn validate(&self) -> Result<(), CobarsError> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(CobarsError::InvalidInput(format!(
                "tolerance must be positive and finite, got {}", self.tolerance
            )));
        }
        if !(self.give_up_tolerance >= 0.0 && self.give_up_tolerance.is_finite()) {
            return Err(CobarsError::InvalidInput(format!(
                "give_up_tolerance must be non-negative and finite, got {}",
                self.give_up_tolerance
            )));
        }
        if !(self.regularization >= 0.0 && self.regularization.is_finite()) {
            return Err(CobarsError::InvalidInput(format!(
                "regularization must be non-negative and finite, got {}", self.regularization
            )));
        }
        if !(self.armijo_slope_factor >= 0.0 && self.armijo_slope_factor.is_finite()) {
            return Err(CobarsError::InvalidInput(format!(
                "armijo_slope_factor must be non-negative and finite, got {}",
                self.armijo_slope_factor
            )));
        }
        if !(self.armijo_shrink_factor > 0.0 && self.armijo_shrink_factor < 1.0) {
            return Err(CobarsError::InvalidInput(format!(
                "armijo_shrink_factor must lie in (0, 1), got {}", self.armijo_shrink_factor
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Random-variable trait  (extensible — implement for custom functionals)
// ─────────────────────────────────────────────────────────────

/// A random variable of closed-polygon configurations.
///
/// The driver evaluates implementations on the solved per-sample state
/// and accumulates the values weighted by the sampling weights.
/// Implementations must be cheap to clone (`clone_box`): the driver hands
/// one copy to each worker task so that evaluation never shares mutable
/// state.
pub trait RandomVariable<const D: usize>: Send + Sync {
    /// Value of the functional on the current sample.
    fn evaluate(&self, sampler: &Sampler<D>) -> f64;

    /// Lower end of the value range for the given configuration.
    fn min_value(&self, sampler: &Sampler<D>) -> f64;

    /// Upper end of the value range for the given configuration.
    fn max_value(&self, sampler: &Sampler<D>) -> f64;

    /// Human-readable identifier used in diagnostics.
    fn tag(&self) -> String;

    /// Whether `evaluate` reads the polygon vertex positions.  When any
    /// functional in a batch returns `true`, the driver computes the
    /// space coordinates before evaluation.
    fn requires_space_curve(&self) -> bool {
        false
    }

    /// Owned copy for handing one instance to each worker thread.
    fn clone_box(&self) -> Box<dyn RandomVariable<D>>;
}
