//! Curve analysis on synthetic cells with known parameters.

use pv_analysis::{
    analyze, voc_reached, AnalysisError, CurveAnalyzer, PhotovoltaicFigures, SeriesResistance,
};
use pv_core::{CurrentSign, Trace};

const PHOTOCURRENT: f64 = 0.02;
const SATURATION: f64 = 1e-9;
const THERMAL: f64 = 0.05;
const SHUNT: f64 = 1000.0;

fn cell_current(v: f64) -> f64 {
    PHOTOCURRENT - SATURATION * ((v / THERMAL).exp() - 1.0) - v / SHUNT
}

fn sweep(start: f64, step: f64, points: usize) -> Vec<f64> {
    (0..points).map(|k| start + step * k as f64).collect()
}

fn cell_trace(voltages: &[f64]) -> Trace {
    Trace::from_points(voltages.iter().map(|&v| (v, cell_current(v))))
}

fn true_voc() -> f64 {
    let (mut lo, mut hi) = (0.0, 1.5);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if cell_current(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[test]
fn illuminated_cell_figures() {
    let trace = cell_trace(&sweep(-0.2, 0.02, 61));
    let metrics = analyze(&trace, 0.1);

    let jsc = metrics.short_circuit_current.clone().unwrap();
    assert!((jsc - PHOTOCURRENT).abs() < 1e-6, "jsc = {jsc}");

    let voc = metrics.open_circuit_voltage.clone().unwrap();
    assert!((voc - true_voc()).abs() < 5e-3, "voc = {voc}");

    let pmax = metrics.max_power.clone().unwrap();
    let brute = trace
        .points()
        .map(|(v, i)| v * i)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(pmax.power, brute);
    assert_eq!(trace.voltage()[pmax.index], pmax.voltage);

    let ff = metrics.fill_factor.clone().unwrap();
    assert!(ff > 0.7 && ff < 0.9, "ff = {ff}");

    let rp = metrics.parallel_resistance.clone().unwrap();
    assert!((rp - SHUNT).abs() < 1.0, "rp = {rp}");

    assert!(voc_reached(&trace, voc));

    let figures = PhotovoltaicFigures::from_metrics(&metrics, 0.5, 100.0).unwrap();
    assert!((figures.jsc_density_ma_cm2 - 40.0).abs() < 1e-3);
    assert!((figures.efficiency_percent - 100.0 * pmax.power / 0.5 / 0.1).abs() < 1e-9);
}

#[test]
fn seven_point_trace_is_enough() {
    let trace = Trace::from_points(sweep(-0.3, 0.1, 7).into_iter().map(|v| (v, 2.0 - 0.5 * v)));
    let metrics = analyze(&trace, 0.1);
    assert!((metrics.short_circuit_current.unwrap() - 2.0).abs() < 1e-9);
    assert!((metrics.open_circuit_voltage.unwrap() - 4.0).abs() < 1e-6);
    assert!((metrics.parallel_resistance.unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn fill_factor_of_known_values() {
    // pmax = 3, jsc = 2, voc = 2
    assert!((pv_analysis::fill_factor(3.0, 2.0, 2.0).unwrap() - 0.75).abs() < 1e-12);
}

#[test]
fn series_resistance_on_linear_tail() {
    // current = a - b·v, crossing zero early so the 6th-from-last sample is negative
    let b = 0.25;
    let trace = Trace::from_points(sweep(0.0, 0.1, 12).into_iter().map(|v| (v, 0.05 - b * v)));
    let rs = pv_analysis::series_resistance(&trace, 1.0).unwrap();
    assert!((rs.ohms().unwrap() - 1.0 / b).abs() < 1e-9);
}

#[test]
fn series_resistance_not_found_without_tail() {
    let five = Trace::from_points(sweep(0.5, 0.1, 5).into_iter().map(|v| (v, -v)));
    assert_eq!(
        pv_analysis::series_resistance(&five, 1.0),
        Ok(SeriesResistance::NotFound)
    );

    let rising = Trace::from_points(sweep(0.5, 0.1, 10).into_iter().map(|v| (v, v - 2.0)));
    assert_eq!(
        pv_analysis::series_resistance(&rising, 1.0),
        Ok(SeriesResistance::NotFound)
    );
}

#[test]
fn instrument_convention_matches_negated_trace() {
    let trace = cell_trace(&sweep(-0.2, 0.02, 61));
    let raw = trace.oriented(CurrentSign::Instrument);

    let direct = analyze(&trace, 0.1);
    let via_sign = CurveAnalyzer::new(0.1)
        .with_current_sign(CurrentSign::Instrument)
        .analyze(&raw);
    assert_eq!(direct, via_sign);
}

#[test]
fn one_failing_metric_keeps_the_others() {
    // Two distinct voltages: quadratic fits fail, max power survives.
    let trace = Trace::from_points([(0.0, 0.01), (0.5, 0.008)]);
    let metrics = analyze(&trace, 0.1);
    assert!(metrics.max_power.is_ok());
    assert!(matches!(
        metrics.short_circuit_current,
        Err(AnalysisError::Fit(_))
    ));
    assert!(matches!(metrics.fill_factor, Err(AnalysisError::Unavailable(_))));

    let json = serde_json::to_value(&metrics).unwrap();
    assert!(json["max_power"]["Ok"]["power"].is_number());
    assert!(json["short_circuit_current"]["Err"].is_object());
}
