//! Decoded voltage/current traces.

use crate::error::TraceError;
use serde::{Deserialize, Serialize};

/// Ordered voltage/current samples from one acquisition.
///
/// Index `i` of both sequences belongs to the same acquisition instant. The
/// two sequences always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TraceColumns")]
pub struct Trace {
    voltage: Vec<f64>,
    current: Vec<f64>,
}

#[derive(Deserialize)]
struct TraceColumns {
    voltage: Vec<f64>,
    current: Vec<f64>,
}

impl TryFrom<TraceColumns> for Trace {
    type Error = TraceError;

    fn try_from(columns: TraceColumns) -> Result<Self, Self::Error> {
        Trace::new(columns.voltage, columns.current)
    }
}

impl Trace {
    /// Pair up voltage and current samples.
    pub fn new(voltage: Vec<f64>, current: Vec<f64>) -> Result<Self, TraceError> {
        if voltage.len() != current.len() {
            return Err(TraceError {
                voltage_len: voltage.len(),
                current_len: current.len(),
            });
        }
        Ok(Self { voltage, current })
    }

    /// Build a trace from `(voltage, current)` pairs.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let (voltage, current) = points.into_iter().unzip();
        Self { voltage, current }
    }

    /// Voltage samples in acquisition order.
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Current samples in acquisition order.
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    /// Whether the trace holds no points.
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// Iterate over `(voltage, current)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.voltage.iter().copied().zip(self.current.iter().copied())
    }

    /// Return a copy whose current follows the generator sign convention.
    pub fn oriented(&self, sign: CurrentSign) -> Trace {
        match sign {
            CurrentSign::Generator => self.clone(),
            CurrentSign::Instrument => Trace {
                voltage: self.voltage.clone(),
                current: self.current.iter().map(|i| -i).collect(),
            },
        }
    }

    /// Mean of the voltage samples, `None` for an empty trace.
    pub fn mean_voltage(&self) -> Option<f64> {
        mean(&self.voltage)
    }

    /// Mean of the current samples, `None` for an empty trace.
    pub fn mean_current(&self) -> Option<f64> {
        mean(&self.current)
    }

    /// Smallest and largest voltage sample.
    pub fn voltage_span(&self) -> Option<(f64, f64)> {
        self.voltage.iter().copied().fold(None, |span, v| match span {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Split into the raw voltage and current vectors.
    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.voltage, self.current)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sign convention of the current samples in a trace.
///
/// Curve analysis expects power delivered by the device to be positive
/// (`Generator`). A source-measure unit reports current flowing into its
/// output, which is negative while an illuminated cell delivers power
/// (`Instrument`); such traces are negated before analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentSign {
    /// Current already positive in the power-generating quadrant.
    #[default]
    Generator,
    /// Raw SMU convention; negated before analysis.
    Instrument,
}
