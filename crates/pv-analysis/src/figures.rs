//! Area- and irradiance-normalised figures for reporting.

use crate::analyzer::CurveMetrics;
use crate::error::AnalysisError;
use pv_core::Trace;
use serde::Serialize;

/// Irradiance is given in mW/cm²; power density is in W/cm².
const MILLIWATT: f64 = 1e-3;
/// Current density is reported in mA/cm².
const MILLIAMP_PER_AMP: f64 = 1e3;

/// Headline figures of an illuminated cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhotovoltaicFigures {
    /// Short-circuit current density (mA/cm²).
    pub jsc_density_ma_cm2: f64,
    /// Open-circuit voltage (V).
    pub voc: f64,
    /// Fill factor.
    pub fill_factor: f64,
    /// Maximum power (W).
    pub max_power_w: f64,
    /// Voltage at maximum power (V).
    pub max_power_voltage: f64,
    /// Current density at maximum power (mA/cm²).
    pub max_power_current_density_ma_cm2: f64,
    /// Power conversion efficiency (%); 0 for dark curves.
    pub efficiency_percent: f64,
}

impl PhotovoltaicFigures {
    /// Normalise metrics by the cell area (cm²) and the irradiance (mW/cm²).
    pub fn from_metrics(
        metrics: &CurveMetrics,
        cell_area_cm2: f64,
        irradiance_mw_cm2: f64,
    ) -> Result<Self, AnalysisError> {
        let max_power = metrics
            .max_power
            .clone()
            .map_err(|_| AnalysisError::Unavailable("maximum power"))?;
        let jsc = metrics
            .short_circuit_current
            .clone()
            .map_err(|_| AnalysisError::Unavailable("short-circuit current"))?;
        let voc = metrics
            .open_circuit_voltage
            .clone()
            .map_err(|_| AnalysisError::Unavailable("open-circuit voltage"))?;
        let fill_factor = metrics.fill_factor.clone()?;

        let efficiency_percent = if irradiance_mw_cm2 > 0.0 {
            100.0 * (max_power.power / cell_area_cm2) / (irradiance_mw_cm2 * MILLIWATT)
        } else {
            0.0
        };

        Ok(Self {
            jsc_density_ma_cm2: jsc * MILLIAMP_PER_AMP / cell_area_cm2,
            voc,
            fill_factor,
            max_power_w: max_power.power,
            max_power_voltage: max_power.voltage,
            max_power_current_density_ma_cm2: max_power.current * MILLIAMP_PER_AMP
                / cell_area_cm2,
            efficiency_percent,
        })
    }
}

/// Whether a sweep passed through the open-circuit point.
///
/// `voc` must lie within the swept voltages and the current must change sign
/// between the first and the last sample (a zero endpoint counts as a change).
pub fn voc_reached(trace: &Trace, voc: f64) -> bool {
    let Some((lo, hi)) = trace.voltage_span() else {
        return false;
    };
    let current = trace.current();
    let (Some(first), Some(last)) = (current.first(), current.last()) else {
        return false;
    };
    (lo..=hi).contains(&voc) && first * last <= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{MaxPowerPoint, SeriesResistance};

    fn metrics() -> CurveMetrics {
        CurveMetrics {
            max_power: Ok(MaxPowerPoint {
                power: 0.015,
                voltage: 0.5,
                current: 0.03,
                index: 4,
            }),
            short_circuit_current: Ok(0.04),
            open_circuit_voltage: Ok(0.6),
            fill_factor: Ok(0.625),
            series_resistance: Ok(SeriesResistance::NotFound),
            parallel_resistance: Ok(500.0),
        }
    }

    #[test]
    fn normalises_by_area_and_irradiance() {
        let figures = PhotovoltaicFigures::from_metrics(&metrics(), 2.0, 100.0).unwrap();
        assert!((figures.jsc_density_ma_cm2 - 20.0).abs() < 1e-12);
        assert!((figures.max_power_current_density_ma_cm2 - 15.0).abs() < 1e-12);
        // 7.5 mW/cm² out of 100 mW/cm²
        assert!((figures.efficiency_percent - 7.5).abs() < 1e-9);
        assert_eq!(figures.voc, 0.6);
    }

    #[test]
    fn dark_curve_has_zero_efficiency() {
        let figures = PhotovoltaicFigures::from_metrics(&metrics(), 1.0, 0.0).unwrap();
        assert_eq!(figures.efficiency_percent, 0.0);
    }

    #[test]
    fn missing_metric_propagates() {
        let mut m = metrics();
        m.open_circuit_voltage = Err(AnalysisError::EmptyTrace);
        assert_eq!(
            PhotovoltaicFigures::from_metrics(&m, 1.0, 100.0),
            Err(AnalysisError::Unavailable("open-circuit voltage"))
        );
    }

    #[test]
    fn voc_reached_requires_range_and_sign_change() {
        let trace = Trace::from_points([(-0.1, 0.02), (0.3, 0.015), (0.7, -0.01)]);
        assert!(voc_reached(&trace, 0.6));
        assert!(!voc_reached(&trace, 0.8));

        let short = Trace::from_points([(-0.1, 0.02), (0.3, 0.015)]);
        assert!(!voc_reached(&short, 0.2));
        assert!(!voc_reached(&Trace::default(), 0.0));
    }
}
