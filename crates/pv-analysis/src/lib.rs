//! `pv-analysis`
//!
//! Figures of merit of photovoltaic current-voltage curves: maximum-power
//! point, short-circuit current, open-circuit voltage, fill factor and the
//! series and parallel slope resistances.
//!
//! Analysis is pure and deterministic. Each metric is returned as its own
//! `Result` inside [`CurveMetrics`], so a noisy tail that defeats the
//! series-resistance search still leaves the other figures available.
//!
//! ```rust
//! use pv_analysis::analyze;
//! use pv_core::Trace;
//!
//! let trace = Trace::from_points((0..=8).map(|k| {
//!     let v = -0.2 + 0.1 * k as f64;
//!     (v, 0.02 - 0.03 * v)
//! }));
//! let metrics = analyze(&trace, 0.1);
//! assert!((metrics.short_circuit_current.unwrap() - 0.02).abs() < 1e-9);
//! ```

pub mod analyzer;
pub mod error;
pub mod figures;
pub mod fit;

pub use analyzer::{
    analyze, fill_factor, max_power, open_circuit_voltage, parallel_resistance,
    series_resistance, short_circuit_current, CurveAnalyzer, CurveMetrics, MaxPowerPoint,
    SeriesResistance,
};
pub use error::{AnalysisError, FitError};
pub use figures::{voc_reached, PhotovoltaicFigures};
pub use fit::{polyfit, Polynomial};
