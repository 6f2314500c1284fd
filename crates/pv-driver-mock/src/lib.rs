//! `pv-driver-mock`
//!
//! Simulated Keithley 2400 for hardware-free development and testing.
//!
//! [`MockSourceMeter`] implements [`CommandChannel`](pv_core::CommandChannel)
//! and answers the same SCPI subset the real driver sends, with readings
//! computed from a [`SolarCell`] single-diode model.
//!
//! ## Features
//!
//! - Seeded noise via [`MockRng`] for reproducible traces
//! - Configurable busy time per acquisition
//! - Fault injection with [`FaultConfig`] and [`FaultScenario`]
//! - Shared [`CommandLog`] for asserting on command order

pub mod cell;
pub mod faults;
pub mod rng;
pub mod source_meter;

pub use cell::{SolarCell, THERMAL_VOLTAGE_300K};
pub use faults::{FaultConfig, FaultScenario};
pub use rng::MockRng;
pub use source_meter::{CommandLog, MockSourceMeter, IDENTITY, STATUS_IDLE};
