//! Error types shared across the workspace.
//!
//! All library errors are `thiserror` enums so callers can match on the
//! failure class instead of parsing messages:
//!
//! - **`CommunicationError`**: a transport-level failure while writing a
//!   command or reading a reply. Carries a [`CommunicationErrorKind`] used by
//!   the completion poller to separate transient from permanent failures.
//! - **`DecodeError`**: the raw trace buffer did not contain whole points.
//! - **`TraceError`**: voltage and current sequences of different length.
//! - **`ConfigurationError`**: a sweep request that violates its invariants
//!   (zero step, non-positive compliance, step pointing away from the end
//!   voltage, ...).
//! - **`SweepError`**: everything that can abort a measurement, with
//!   `#[from]` conversions so protocol code can use `?` throughout.

use std::time::Duration;
use thiserror::Error;

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationErrorKind {
    /// Underlying I/O failed (write error, read error, framing).
    Io,
    /// No complete reply arrived within the read timeout.
    Timeout,
    /// The connection reached end-of-file or was dropped.
    Closed,
    /// A reply arrived but could not be interpreted (e.g. non-numeric data).
    Protocol,
}

impl std::fmt::Display for CommunicationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CommunicationErrorKind::Io => "i/o",
            CommunicationErrorKind::Timeout => "timeout",
            CommunicationErrorKind::Closed => "closed",
            CommunicationErrorKind::Protocol => "protocol",
        };
        write!(f, "{}", label)
    }
}

/// Transport-level failure while talking to the instrument.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error on '{command}': {message}")]
pub struct CommunicationError {
    /// Failure class.
    pub kind: CommunicationErrorKind,
    /// Command or query that was in flight.
    pub command: String,
    /// Human readable detail.
    pub message: String,
}

impl CommunicationError {
    /// Create a new communication error.
    pub fn new(
        kind: CommunicationErrorKind,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            command: command.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a read timeout on `command`.
    pub fn timeout(command: impl Into<String>, after: Duration) -> Self {
        Self::new(
            CommunicationErrorKind::Timeout,
            command,
            format!("no reply within {} ms", after.as_millis()),
        )
    }

    /// Whether retrying the same request can reasonably succeed.
    ///
    /// A closed connection is permanent; every other kind may clear on its own
    /// (a status query that collides with the end of a sweep, a garbled line).
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, CommunicationErrorKind::Closed)
    }
}

/// The raw buffer did not split into whole 5-sample points.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("raw trace buffer holds {len} samples, not a multiple of {fields_per_point}")]
pub struct DecodeError {
    /// Number of samples received.
    pub len: usize,
    /// Samples expected per sweep point.
    pub fields_per_point: usize,
}

/// Voltage and current sequences of a trace must pair up one-to-one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("trace has {voltage_len} voltage samples but {current_len} current samples")]
pub struct TraceError {
    /// Length of the voltage sequence.
    pub voltage_len: usize,
    /// Length of the current sequence.
    pub current_len: usize,
}

/// A sweep request that cannot be issued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The voltage step is zero or not finite.
    #[error("sweep step must be a non-zero finite voltage, got {0}")]
    InvalidStep(f64),

    /// The step points away from the end voltage.
    #[error("step {step} V does not travel from {start} V towards {end} V")]
    StepDirection {
        /// Start voltage.
        start: f64,
        /// End voltage.
        end: f64,
        /// Offending step.
        step: f64,
    },

    /// Compliance must be strictly positive.
    #[error("compliance must be positive, got {0}")]
    Compliance(f64),

    /// A voltage, current or timing value is NaN or infinite.
    #[error("{name} must be finite, got {value}")]
    NotFinite {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Integration time outside the supported range.
    #[error("integration time {nplc} NPLC outside {min}..={max}")]
    IntegrationTime {
        /// Requested NPLC.
        nplc: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Negative per-point delay.
    #[error("source delay must be >= 0 s, got {0}")]
    Delay(f64),

    /// Point count is zero or larger than the instrument buffer.
    #[error("point count {count} outside 1..={max}")]
    PointCount {
        /// Requested point count.
        count: usize,
        /// Largest supported count.
        max: usize,
    },

    /// A fixed current range must be positive.
    #[error("current range must be positive, got {0}")]
    CurrentRange(f64),
}

/// Everything that aborts an in-progress measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    /// Fatal transport failure while configuring, triggering or fetching.
    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),

    /// Fetched buffer could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The request was rejected before anything was sent.
    #[error("invalid sweep configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),

    /// The fetched buffer decoded, but not to the programmed point count.
    #[error("expected {expected} buffer samples, instrument returned {actual}")]
    UnexpectedBufferLength {
        /// `5 × points`.
        expected: usize,
        /// Samples actually returned.
        actual: usize,
    },

    /// The completion deadline passed before the instrument reported done.
    #[error("sweep did not complete within {elapsed:?} ({polls} status polls)")]
    Timeout {
        /// Time spent waiting.
        elapsed: Duration,
        /// Status queries issued.
        polls: u64,
    },

    /// The caller aborted the sweep through its abort handle.
    #[error("sweep aborted by caller")]
    Aborted,
}

impl SweepError {
    /// Whether the sweep ended while waiting for completion rather than on a
    /// transport or decoding fault.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SweepError::Timeout { .. } | SweepError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_connection_is_not_transient() {
        let err = CommunicationError::new(CommunicationErrorKind::Closed, ":INIT", "eof");
        assert!(!err.is_transient());

        let err = CommunicationError::timeout(":STAT:OPER:COND?", Duration::from_millis(500));
        assert!(err.is_transient());
        assert!(err.to_string().contains("500 ms"));
    }

    #[test]
    fn communication_error_converts_into_sweep_error() {
        fn fails() -> Result<(), SweepError> {
            Err(CommunicationError::new(
                CommunicationErrorKind::Io,
                "*RST",
                "broken pipe",
            ))?;
            Ok(())
        }

        match fails() {
            Err(SweepError::Communication(err)) => assert_eq!(err.command, "*RST"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn interrupted_classification() {
        assert!(SweepError::Aborted.is_interrupted());
        assert!(SweepError::Timeout {
            elapsed: Duration::from_secs(1),
            polls: 3
        }
        .is_interrupted());
        assert!(!SweepError::Decode(DecodeError {
            len: 7,
            fields_per_point: 5
        })
        .is_interrupted());
    }
}
