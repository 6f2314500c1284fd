//! De-interleaving of the trace buffer.
//!
//! `:TRAC:DATA?` returns five readings per point:
//! `voltage, current, resistance, timestamp, status`. Only voltage and current
//! are kept.

use pv_core::{DecodeError, Trace};

/// Readings per buffer point.
pub const FIELDS_PER_POINT: usize = 5;

const VOLTAGE_OFFSET: usize = 0;
const CURRENT_OFFSET: usize = 1;

/// Flat samples exactly as fetched from the instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTraceBuffer(Vec<f64>);

impl RawTraceBuffer {
    /// Wrap fetched samples.
    pub fn new(samples: Vec<f64>) -> Self {
        Self(samples)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no samples were fetched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Samples in instrument order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for RawTraceBuffer {
    fn from(samples: Vec<f64>) -> Self {
        Self(samples)
    }
}

/// Stateless buffer decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceDecoder;

impl TraceDecoder {
    /// Split a raw buffer into a voltage/current trace.
    pub fn decode(&self, raw: RawTraceBuffer) -> Result<Trace, DecodeError> {
        decode(raw)
    }
}

/// Split a raw buffer into a voltage/current trace.
pub fn decode(raw: RawTraceBuffer) -> Result<Trace, DecodeError> {
    if raw.len() % FIELDS_PER_POINT != 0 {
        return Err(DecodeError {
            len: raw.len(),
            fields_per_point: FIELDS_PER_POINT,
        });
    }
    Ok(Trace::from_points(
        raw.as_slice()
            .chunks_exact(FIELDS_PER_POINT)
            .map(|point| (point[VOLTAGE_OFFSET], point[CURRENT_OFFSET])),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_voltage_and_current_columns() {
        let raw = RawTraceBuffer::new(vec![
            0.0, -0.02, 9.9e37, 0.1, 21504.0, //
            0.5, -0.01, 9.9e37, 0.2, 21504.0, //
            1.0, 0.03, 9.9e37, 0.3, 21504.0,
        ]);
        let trace = TraceDecoder.decode(raw).unwrap();
        assert_eq!(trace.voltage(), &[0.0, 0.5, 1.0]);
        assert_eq!(trace.current(), &[-0.02, -0.01, 0.03]);
    }

    #[test]
    fn empty_buffer_is_empty_trace() {
        assert!(decode(RawTraceBuffer::default()).unwrap().is_empty());
    }

    #[test]
    fn rejects_partial_point() {
        let err = decode(vec![1.0; 7].into()).unwrap_err();
        assert_eq!(
            err,
            DecodeError {
                len: 7,
                fields_per_point: 5
            }
        );
    }
}
