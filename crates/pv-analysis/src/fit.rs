//! Least-squares polynomial regression.
//!
//! The Vandermonde system is solved through a singular value decomposition so
//! rank deficiency is detected rather than turned into huge coefficients. The
//! abscissa is scaled by its largest magnitude first; this keeps the matrix
//! well conditioned for both volt-scale and milliamp-scale inputs and leaves
//! the constant coefficient unchanged.

use crate::error::FitError;
use nalgebra::{DMatrix, DVector};

/// Singular values below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-12;

/// Polynomial with coefficients in ascending order of power.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    /// Wrap ascending-order coefficients.
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    /// Coefficients, constant term first.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Value at `x = 0`.
    pub fn constant(&self) -> f64 {
        self.coefficients.first().copied().unwrap_or(0.0)
    }

    /// First-order coefficient (the slope of a linear fit).
    pub fn slope(&self) -> f64 {
        self.coefficients.get(1).copied().unwrap_or(0.0)
    }

    /// Polynomial degree.
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Evaluate with Horner's scheme.
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * x + c)
    }
}

/// Fit `y ≈ p(x)` of the given degree in the least-squares sense.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let terms = degree + 1;
    if x.len() < terms {
        return Err(FitError::InsufficientPoints {
            needed: terms,
            got: x.len(),
        });
    }
    if x.iter().chain(y).any(|value| !value.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let scale = x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let scale = if scale > 0.0 { scale } else { 1.0 };

    let vandermonde = DMatrix::from_fn(x.len(), terms, |row, col| {
        (x[row] / scale).powi(col as i32)
    });
    let rhs = DVector::from_column_slice(y);

    let svd = vandermonde.svd(true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    if largest <= 0.0 || smallest <= largest * RANK_TOLERANCE {
        return Err(FitError::Degenerate);
    }

    let scaled = svd
        .solve(&rhs, largest * RANK_TOLERANCE)
        .map_err(|_| FitError::Degenerate)?;

    let coefficients: Vec<f64> = scaled
        .iter()
        .enumerate()
        .map(|(power, c)| c / scale.powi(power as i32))
        .collect();
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(Polynomial::new(coefficients))
}
