//! Figures of merit from a voltage/current trace.
//!
//! Every metric is computed from a small window of the trace so that the
//! analysis works on short sweeps (seven points are enough) and tolerates
//! noise away from the region of interest. Metrics are independent: a failed
//! series-resistance search never hides the maximum-power point.
//!
//! All functions expect the generator sign convention (current positive in
//! the power-producing quadrant). [`CurveAnalyzer`] re-orients traces
//! recorded in the instrument convention before analysing them.

use crate::error::AnalysisError;
use crate::fit::polyfit;
use pv_core::{CurrentSign, Trace};
use serde::Serialize;

/// Half-width of the Jsc/Voc window: `[k-3, k+3)`.
const CROSSING_HALF_WINDOW: usize = 3;
/// Parallel-resistance window: `[k-5, k+6)`.
const SHUNT_WINDOW_BEFORE: usize = 5;
const SHUNT_WINDOW_AFTER: usize = 6;
/// Points in the series-resistance tail window.
const SERIES_WINDOW: usize = 5;
/// Points dropped from the tail between attempts.
const SERIES_SHRINK: usize = 2;
/// A fitted line whose rise over the window is below this fraction of the
/// current magnitude is treated as flat.
const FLAT_TOLERANCE: f64 = 1e-12;

/// Operating point with the largest `v · i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaxPowerPoint {
    /// `v · i` at the point (W).
    pub power: f64,
    /// Voltage at the point (V).
    pub voltage: f64,
    /// Current at the point (A).
    pub current: f64,
    /// Index in the trace.
    pub index: usize,
}

/// Outcome of the series-resistance search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesResistance {
    /// Resistance in ohms.
    Found(f64),
    /// The trace has no qualifying high-bias tail.
    NotFound,
}

impl SeriesResistance {
    /// Resistance in ohms when found.
    pub fn ohms(&self) -> Option<f64> {
        match self {
            SeriesResistance::Found(ohms) => Some(*ohms),
            SeriesResistance::NotFound => None,
        }
    }
}

/// Figures of merit of one I-V curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveMetrics {
    /// Maximum-power point.
    pub max_power: Result<MaxPowerPoint, AnalysisError>,
    /// Current at 0 V (A).
    pub short_circuit_current: Result<f64, AnalysisError>,
    /// Voltage at 0 A (V).
    pub open_circuit_voltage: Result<f64, AnalysisError>,
    /// `pmax / (jsc · voc)`.
    pub fill_factor: Result<f64, AnalysisError>,
    /// High-bias slope resistance (Ω).
    pub series_resistance: Result<SeriesResistance, AnalysisError>,
    /// Zero-bias slope resistance (Ω).
    pub parallel_resistance: Result<f64, AnalysisError>,
}

/// Curve analysis with a fixed compliance bound and sign convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveAnalyzer {
    compliance: f64,
    current_sign: CurrentSign,
}

impl CurveAnalyzer {
    /// Analyzer for traces already in the generator convention.
    pub fn new(compliance: f64) -> Self {
        Self {
            compliance,
            current_sign: CurrentSign::Generator,
        }
    }

    /// Select the sign convention of the traces passed to [`analyze`](Self::analyze).
    pub fn with_current_sign(mut self, current_sign: CurrentSign) -> Self {
        self.current_sign = current_sign;
        self
    }

    /// Compliance bound used by the series-resistance search.
    pub fn compliance(&self) -> f64 {
        self.compliance
    }

    /// Compute all metrics.
    pub fn analyze(&self, trace: &Trace) -> CurveMetrics {
        let oriented;
        let trace = match self.current_sign {
            CurrentSign::Generator => trace,
            CurrentSign::Instrument => {
                oriented = trace.oriented(CurrentSign::Instrument);
                &oriented
            }
        };

        let max_power = max_power(trace);
        let short_circuit_current = short_circuit_current(trace);
        let open_circuit_voltage = open_circuit_voltage(trace);
        let fill_factor = match (&max_power, &short_circuit_current, &open_circuit_voltage) {
            (Ok(pmax), Ok(jsc), Ok(voc)) => fill_factor(pmax.power, *jsc, *voc),
            (Err(_), _, _) => Err(AnalysisError::Unavailable("maximum power")),
            (_, Err(_), _) => Err(AnalysisError::Unavailable("short-circuit current")),
            (_, _, Err(_)) => Err(AnalysisError::Unavailable("open-circuit voltage")),
        };
        let metrics = CurveMetrics {
            max_power,
            short_circuit_current,
            open_circuit_voltage,
            fill_factor,
            series_resistance: series_resistance(trace, self.compliance),
            parallel_resistance: parallel_resistance(trace),
        };
        tracing::debug!(points = trace.len(), ?metrics, "curve analysed");
        metrics
    }
}

/// Analyze a generator-convention trace.
pub fn analyze(trace: &Trace, compliance: f64) -> CurveMetrics {
    CurveAnalyzer::new(compliance).analyze(trace)
}

/// Point of maximum `v · i`; the first one wins on ties.
pub fn max_power(trace: &Trace) -> Result<MaxPowerPoint, AnalysisError> {
    let mut best: Option<MaxPowerPoint> = None;
    for (index, (voltage, current)) in trace.points().enumerate() {
        let power = voltage * current;
        if best.map_or(true, |b| power > b.power) {
            best = Some(MaxPowerPoint {
                power,
                voltage,
                current,
                index,
            });
        }
    }
    best.ok_or(AnalysisError::EmptyTrace)
}

/// Current at zero voltage from a quadratic fit `i(v)` around the sample
/// closest to 0 V.
pub fn short_circuit_current(trace: &Trace) -> Result<f64, AnalysisError> {
    let k = argmin_abs(trace.voltage()).ok_or(AnalysisError::EmptyTrace)?;
    let window = clamp_window(k, CROSSING_HALF_WINDOW, CROSSING_HALF_WINDOW, trace.len());
    let fit = polyfit(&trace.voltage()[window.clone()], &trace.current()[window], 2)?;
    Ok(fit.constant())
}

/// Voltage at zero current from a quadratic fit `v(i)` around the sample
/// closest to 0 A.
pub fn open_circuit_voltage(trace: &Trace) -> Result<f64, AnalysisError> {
    let k = argmin_abs(trace.current()).ok_or(AnalysisError::EmptyTrace)?;
    let window = clamp_window(k, CROSSING_HALF_WINDOW, CROSSING_HALF_WINDOW, trace.len());
    let fit = polyfit(&trace.current()[window.clone()], &trace.voltage()[window], 2)?;
    Ok(fit.constant())
}

/// `max_power / (jsc · voc)`.
pub fn fill_factor(max_power: f64, jsc: f64, voc: f64) -> Result<f64, AnalysisError> {
    let denominator = jsc * voc;
    let undefined = AnalysisError::FillFactor {
        max_power,
        jsc,
        voc,
    };
    if denominator.is_nan() || denominator <= 0.0 {
        return Err(undefined);
    }
    let ff = max_power / denominator;
    if ff.is_finite() && ff >= 0.0 {
        Ok(ff)
    } else {
        Err(undefined)
    }
}

/// Slope resistance of the high-forward-bias tail.
///
/// Walks back from the end of the trace looking for five strictly decreasing
/// currents, the last still above `-compliance`. The search gives up when the
/// sample just before the window is positive (the window would sit before the
/// Voc crossing) or when fewer than six points remain; otherwise the tail is
/// shortened by two points per attempt.
pub fn series_resistance(
    trace: &Trace,
    compliance: f64,
) -> Result<SeriesResistance, AnalysisError> {
    let voltage = trace.voltage();
    let current = trace.current();
    let mut len = trace.len();

    while len > SERIES_WINDOW {
        if current[len - SERIES_WINDOW - 1] > 0.0 {
            break;
        }
        let tail = &current[len - SERIES_WINDOW..len];
        let decreasing = tail.windows(2).all(|pair| pair[0] > pair[1]);
        if decreasing && tail[SERIES_WINDOW - 1] > -compliance {
            return slope_resistance(&voltage[len - SERIES_WINDOW..len], tail)
                .map(SeriesResistance::Found);
        }
        len -= SERIES_SHRINK;
    }
    Ok(SeriesResistance::NotFound)
}

/// Slope resistance around 0 V from a linear fit over `[k-5, k+6)`.
pub fn parallel_resistance(trace: &Trace) -> Result<f64, AnalysisError> {
    let k = argmin_abs(trace.voltage()).ok_or(AnalysisError::EmptyTrace)?;
    let window = clamp_window(k, SHUNT_WINDOW_BEFORE, SHUNT_WINDOW_AFTER, trace.len());
    slope_resistance(&trace.voltage()[window.clone()], &trace.current()[window])
}

/// `-1 / slope` of a linear fit `i(v)`.
fn slope_resistance(voltage: &[f64], current: &[f64]) -> Result<f64, AnalysisError> {
    let slope = polyfit(voltage, current, 1)?.slope();
    let (lo, hi) = voltage
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let magnitude = current.iter().fold(0.0_f64, |m, i| m.max(i.abs()));
    if slope == 0.0 || (slope * (hi - lo)).abs() <= FLAT_TOLERANCE * magnitude {
        return Err(AnalysisError::ZeroSlope);
    }
    Ok(-1.0 / slope)
}

/// Index of the first sample with the smallest magnitude.
fn argmin_abs(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in values.iter().enumerate() {
        let magnitude = value.abs();
        if best.map_or(true, |(_, b)| magnitude < b) {
            best = Some((index, magnitude));
        }
    }
    best.map(|(index, _)| index)
}

fn clamp_window(
    center: usize,
    before: usize,
    after: usize,
    len: usize,
) -> std::ops::Range<usize> {
    center.saturating_sub(before)..(center + after).min(len)
}
