//! `pv-core`
//!
//! Shared building blocks for photovoltaic current-voltage characterization
//! with a source-measure unit.
//!
//! ## Key Types
//!
//! - [`CommandChannel`]: request/reply transport to the instrument
//! - [`SerialChannel`](serial::SerialChannel): RS-232 implementation of it
//! - [`SweepConfiguration`]: validated voltage-sweep request
//! - [`Trace`]: paired voltage/current samples from one acquisition
//! - [`SweepError`]: everything that can end a measurement early
//! - [`Settings`]: figment-backed application settings

pub mod channel;
pub mod error;
pub mod serial;
pub mod settings;
pub mod sweep;
pub mod trace;

pub use channel::{parse_values, CommandChannel};
pub use error::{
    CommunicationError, CommunicationErrorKind, ConfigurationError, DecodeError, SweepError,
    TraceError,
};
pub use settings::{
    AnalysisSettings, CompletionConfig, CompletionMode, InstrumentSettings, Settings,
    SimulationSettings, MAX_TIMEOUT_S,
};
pub use sweep::{
    CurrentRange, ScanDirection, SweepConfiguration, SweepParameters, TRACE_BUFFER_CAPACITY,
};
pub use trace::{CurrentSign, Trace};
