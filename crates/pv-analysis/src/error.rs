//! Analysis error types.

use serde::Serialize;
use thiserror::Error;

/// A least-squares polynomial fit that could not be computed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitError {
    /// Fewer samples than coefficients.
    #[error("need at least {needed} points for the fit, got {got}")]
    InsufficientPoints {
        /// Coefficients to determine.
        needed: usize,
        /// Samples available.
        got: usize,
    },

    /// The samples do not determine the polynomial (e.g. repeated abscissae).
    #[error("fit is rank-deficient")]
    Degenerate,

    /// Input or result contains NaN or infinity.
    #[error("fit input or result is not finite")]
    NonFinite,

    /// Abscissa and ordinate slices differ in length.
    #[error("x has {x_len} samples but y has {y_len}")]
    LengthMismatch {
        /// Abscissa length.
        x_len: usize,
        /// Ordinate length.
        y_len: usize,
    },
}

/// Why a single curve metric is unavailable.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum AnalysisError {
    /// The trace holds no points.
    #[error("trace is empty")]
    EmptyTrace,

    /// The local regression failed.
    #[error("fit failed: {0}")]
    Fit(#[from] FitError),

    /// A resistance fit produced a horizontal line.
    #[error("fitted slope is zero, resistance is unbounded")]
    ZeroSlope,

    /// `pmax / (jsc · voc)` is not a meaningful fill factor.
    #[error("fill factor undefined for pmax={max_power}, jsc={jsc}, voc={voc}")]
    FillFactor {
        /// Maximum power.
        max_power: f64,
        /// Short-circuit current.
        jsc: f64,
        /// Open-circuit voltage.
        voc: f64,
    },

    /// Depends on another metric that failed.
    #[error("{0} unavailable")]
    Unavailable(&'static str),
}
