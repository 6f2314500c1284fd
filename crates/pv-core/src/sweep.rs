//! Sweep requests.
//!
//! [`SweepParameters`] is the loosely-typed, serde-friendly form read from the
//! settings file or the command line. [`SweepConfiguration`] is the validated,
//! immutable form handed to the protocol; its point count is derived once at
//! construction.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest number of readings the instrument trace buffer holds.
pub const TRACE_BUFFER_CAPACITY: usize = 2500;

/// Supported integration time range in power-line cycles.
pub const NPLC_RANGE: std::ops::RangeInclusive<f64> = 0.01..=10.0;

/// Relative slack applied before flooring the span/step ratio, so that
/// `0.6 / 0.1 = 5.999...` still counts as six steps.
const POINT_COUNT_SLACK: f64 = 1e-9;

/// Measurement range of the sensed current.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CurrentRange {
    /// Let the instrument pick the range for every reading.
    #[default]
    Auto,
    /// Fixed full-scale range in amps.
    Fixed(f64),
}

impl CurrentRange {
    /// Fixed range when `Some`, auto range otherwise.
    pub fn from_option(range: Option<f64>) -> Self {
        match range {
            Some(amps) => CurrentRange::Fixed(amps),
            None => CurrentRange::Auto,
        }
    }
}

/// Direction of travel of a voltage sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// From the start voltage to the end voltage.
    #[default]
    Forward,
    /// From the end voltage back to the start voltage.
    Reverse,
}

/// Number of points of a linear sweep from `start` to `end` inclusive.
///
/// `floor(|end - start| / |step|) + 1`, saturating at `usize::MAX` for
/// steps far too small for the span.
pub fn point_count(start: f64, end: f64, step: f64) -> usize {
    let ratio = (end - start).abs() / step.abs();
    let steps = (ratio + ratio.max(1.0) * POINT_COUNT_SLACK).floor();
    // float-to-int casts saturate
    (steps as usize).saturating_add(1)
}

/// Validated, immutable voltage-sweep request.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfiguration {
    start_voltage: f64,
    end_voltage: f64,
    step_voltage: f64,
    compliance_current: f64,
    current_range: CurrentRange,
    integration_time_nplc: f64,
    delay: Duration,
    number_of_points: usize,
}

impl SweepConfiguration {
    /// Validate a sweep request and derive its point count.
    ///
    /// The step must carry the sign of `end - start` (a decreasing scan uses a
    /// negative step). A zero-length sweep (`start == end`) accepts either sign
    /// and yields one point.
    pub fn new(
        start_voltage: f64,
        end_voltage: f64,
        step_voltage: f64,
        compliance_current: f64,
        current_range: CurrentRange,
        integration_time_nplc: f64,
        delay_seconds: f64,
    ) -> Result<Self, ConfigurationError> {
        finite("start_voltage", start_voltage)?;
        finite("end_voltage", end_voltage)?;
        finite("compliance_current", compliance_current)?;
        finite("integration_time_nplc", integration_time_nplc)?;
        finite("delay_seconds", delay_seconds)?;

        if step_voltage == 0.0 || !step_voltage.is_finite() {
            return Err(ConfigurationError::InvalidStep(step_voltage));
        }
        let travel = end_voltage - start_voltage;
        if travel != 0.0 && travel.signum() != step_voltage.signum() {
            return Err(ConfigurationError::StepDirection {
                start: start_voltage,
                end: end_voltage,
                step: step_voltage,
            });
        }
        validate_compliance(compliance_current)?;
        validate_nplc(integration_time_nplc)?;
        if delay_seconds < 0.0 {
            return Err(ConfigurationError::Delay(delay_seconds));
        }
        let delay = Duration::try_from_secs_f64(delay_seconds)
            .map_err(|_| ConfigurationError::Delay(delay_seconds))?;
        if let CurrentRange::Fixed(amps) = current_range {
            if !(amps > 0.0 && amps.is_finite()) {
                return Err(ConfigurationError::CurrentRange(amps));
            }
        }

        let number_of_points = point_count(start_voltage, end_voltage, step_voltage);
        validate_point_count(number_of_points)?;

        Ok(Self {
            start_voltage,
            end_voltage,
            step_voltage,
            compliance_current,
            current_range,
            integration_time_nplc,
            delay,
            number_of_points,
        })
    }

    /// First programmed voltage.
    pub fn start_voltage(&self) -> f64 {
        self.start_voltage
    }

    /// Last programmed voltage.
    pub fn end_voltage(&self) -> f64 {
        self.end_voltage
    }

    /// Signed voltage increment.
    pub fn step_voltage(&self) -> f64 {
        self.step_voltage
    }

    /// Current protection limit in amps.
    pub fn compliance_current(&self) -> f64 {
        self.compliance_current
    }

    /// Sense range.
    pub fn current_range(&self) -> CurrentRange {
        self.current_range
    }

    /// Integration time in power-line cycles.
    pub fn integration_time_nplc(&self) -> f64 {
        self.integration_time_nplc
    }

    /// Source delay before each reading.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Derived point count.
    pub fn number_of_points(&self) -> usize {
        self.number_of_points
    }

    /// Samples the instrument returns for this sweep (5 per point).
    pub fn expected_buffer_len(&self) -> usize {
        self.number_of_points * 5
    }

    /// Whether the programmed voltages include or straddle 0 V.
    pub fn crosses_zero(&self) -> bool {
        self.start_voltage * self.end_voltage <= 0.0
    }
}

/// Sweep request as written in the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParameters {
    /// Start voltage (V).
    pub start_voltage: f64,
    /// End voltage (V).
    pub end_voltage: f64,
    /// Step magnitude (V); the sign is derived from the scan direction.
    pub step_voltage: f64,
    /// Current compliance (A).
    pub compliance_current: f64,
    /// Fixed sense range (A); absent means auto range.
    pub current_range: Option<f64>,
    /// Integration time (NPLC).
    pub integration_time_nplc: f64,
    /// Source delay per point (s).
    pub delay_seconds: f64,
    /// Scan direction.
    pub direction: ScanDirection,
}

impl Default for SweepParameters {
    fn default() -> Self {
        Self {
            start_voltage: -0.2,
            end_voltage: 1.2,
            step_voltage: 0.01,
            compliance_current: 0.1,
            current_range: None,
            integration_time_nplc: 1.0,
            delay_seconds: 0.0,
            direction: ScanDirection::Forward,
        }
    }
}

impl SweepParameters {
    /// Whether the requested range includes or straddles 0 V.
    pub fn crosses_zero(&self) -> bool {
        self.start_voltage * self.end_voltage <= 0.0
    }

    /// Resolve direction and step sign into a validated configuration.
    ///
    /// A reverse scan runs from `end_voltage` back to `start_voltage`.
    pub fn configuration(&self) -> Result<SweepConfiguration, ConfigurationError> {
        let (from, to) = match self.direction {
            ScanDirection::Forward => (self.start_voltage, self.end_voltage),
            ScanDirection::Reverse => (self.end_voltage, self.start_voltage),
        };
        let magnitude = self.step_voltage.abs();
        let step = if to < from { -magnitude } else { magnitude };

        SweepConfiguration::new(
            from,
            to,
            step,
            self.compliance_current,
            CurrentRange::from_option(self.current_range),
            self.integration_time_nplc,
            self.delay_seconds,
        )
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::NotFinite { name, value })
    }
}

/// Compliance must be a positive, finite limit.
pub fn validate_compliance(compliance: f64) -> Result<(), ConfigurationError> {
    if compliance > 0.0 && compliance.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::Compliance(compliance))
    }
}

/// Integration time must lie in [`NPLC_RANGE`].
pub fn validate_nplc(nplc: f64) -> Result<(), ConfigurationError> {
    if NPLC_RANGE.contains(&nplc) {
        Ok(())
    } else {
        Err(ConfigurationError::IntegrationTime {
            nplc,
            min: *NPLC_RANGE.start(),
            max: *NPLC_RANGE.end(),
        })
    }
}

/// Point count must fit the trace buffer and be at least one.
pub fn validate_point_count(count: usize) -> Result<(), ConfigurationError> {
    if (1..=TRACE_BUFFER_CAPACITY).contains(&count) {
        Ok(())
    } else {
        Err(ConfigurationError::PointCount {
            count,
            max: TRACE_BUFFER_CAPACITY,
        })
    }
}
