//! `pv-driver-keithley`
//!
//! Keithley 2400 source-measure unit driver for photovoltaic I-V sweeps.
//!
//! - [`commands`]: pure builders for the SCPI command sequence
//! - [`completion`]: bounded, abortable completion polling
//! - [`decoder`]: de-interleaving of the five-field trace buffer
//! - [`protocol`]: [`SweepProtocol`], which ties the three together over any
//!   [`CommandChannel`](pv_core::CommandChannel)

pub mod commands;
pub mod completion;
pub mod decoder;
pub mod protocol;

pub use completion::{
    AbortHandle, CompletionCriterion, CompletionPoller, CompletionReport, CompletionSettings,
    InstrumentStatus, PollOutcome, OPERATION_IDLE,
};
pub use decoder::{decode, RawTraceBuffer, TraceDecoder, FIELDS_PER_POINT};
pub use protocol::{ProtocolOptions, SweepProtocol};
