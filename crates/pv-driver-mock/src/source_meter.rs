//! Simulated Keithley 2400 source-measure unit.
//!
//! Interprets the SCPI subset used by the sweep protocol and answers from a
//! [`SolarCell`] model:
//!
//! - source voltage (fixed or staircase sweep), measure current
//! - source current, measure voltage
//! - compliance clamping of the measured quantity
//! - operation condition register: `0` while busy, idle bit (1024) when done
//! - five-field trace buffer (`V, I, R, t, status`)
//!
//! Every command is appended to a shared [`CommandLog`] so tests can assert
//! on the exact sequence.
//!
//! # Example
//!
//! ```rust,ignore
//! use pv_driver_mock::{MockSourceMeter, SolarCell};
//!
//! let smu = MockSourceMeter::new(SolarCell::default())
//!     .with_busy_polls(3)
//!     .with_noise(1e-6, 0.0, Some(42));
//! let log = smu.command_log();
//! ```

use crate::cell::SolarCell;
use crate::faults::FaultConfig;
use crate::rng::MockRng;
use async_trait::async_trait;
use parking_lot::Mutex;
use pv_core::{CommandChannel, CommunicationError, CommunicationErrorKind};
use std::sync::Arc;
use std::time::Duration;

/// Identification reply.
pub const IDENTITY: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,0000000,C32 (simulated)";

/// Operation condition register value of an idle instrument.
pub const STATUS_IDLE: u32 = 1 << 10;

/// Resistance field when resistance is not measured.
const NOT_A_NUMBER: f64 = 9.91e37;
/// Status word bit set when the reading hit compliance.
const COMPLIANCE_BIT: f64 = 8.0;
/// Power-line frequency used for reading timestamps.
const LINE_FREQUENCY_HZ: f64 = 50.0;

/// Shared, append-only record of every command the instrument received.
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    fn push(&self, command: &str) {
        self.0.lock().push(command.to_string());
    }

    /// Snapshot of the received commands.
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Number of received commands.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing was received.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.0.lock().iter().filter(|c| *c == command).count()
    }

    /// Forget everything received so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFunction {
    Voltage,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenseFunction {
    Current,
    Voltage,
}

/// Programmable state, restored by `*RST`.
#[derive(Debug, Clone)]
struct InstrumentState {
    sense: SenseFunction,
    current_protection: f64,
    voltage_protection: f64,
    current_range: Option<f64>,
    nplc: f64,
    source: SourceFunction,
    sweep: bool,
    voltage_level: f64,
    current_level: f64,
    sweep_start: f64,
    sweep_stop: f64,
    sweep_step: f64,
    source_delay: f64,
    trace_points: usize,
    trigger_count: usize,
    output_on: bool,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            sense: SenseFunction::Current,
            current_protection: 1.05e-4,
            voltage_protection: 21.0,
            current_range: None,
            nplc: 1.0,
            source: SourceFunction::Voltage,
            sweep: false,
            voltage_level: 0.0,
            current_level: 0.0,
            sweep_start: 0.0,
            sweep_stop: 0.0,
            sweep_step: 0.0,
            source_delay: 0.0,
            trace_points: 0,
            trigger_count: 1,
            output_on: false,
        }
    }
}

/// Simulated source-measure unit implementing [`CommandChannel`].
#[derive(Debug)]
pub struct MockSourceMeter {
    cell: SolarCell,
    state: InstrumentState,
    busy_polls: u32,
    busy_remaining: u32,
    running: bool,
    buffer: Vec<f64>,
    current_noise: f64,
    voltage_noise: f64,
    rng: MockRng,
    faults: FaultConfig,
    latency: Duration,
    log: CommandLog,
    display: [Option<String>; 2],
    beeps: u32,
    local: bool,
}

impl Default for MockSourceMeter {
    fn default() -> Self {
        Self::new(SolarCell::default())
    }
}

impl MockSourceMeter {
    /// Instrument wired to `cell`; busy for two status polls per acquisition.
    pub fn new(cell: SolarCell) -> Self {
        Self {
            cell,
            state: InstrumentState::default(),
            busy_polls: 2,
            busy_remaining: 0,
            running: false,
            buffer: Vec::new(),
            current_noise: 0.0,
            voltage_noise: 0.0,
            rng: MockRng::new(Some(0)),
            faults: FaultConfig::none(),
            latency: Duration::ZERO,
            log: CommandLog::default(),
            display: [None, None],
            beeps: 0,
            local: false,
        }
    }

    /// Status polls answered "busy" after each `:INIT`.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Uniform reading noise (A, V) from a seeded generator.
    pub fn with_noise(mut self, current_amps: f64, voltage_volts: f64, seed: Option<u64>) -> Self {
        self.current_noise = current_amps.abs();
        self.voltage_noise = voltage_volts.abs();
        self.rng = MockRng::new(seed);
        self
    }

    /// Inject failures.
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Delay every exchange, emulating bus latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Handle to the command record.
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Simulated cell.
    pub fn cell(&self) -> &SolarCell {
        &self.cell
    }

    /// Whether the source output is on.
    pub fn output_on(&self) -> bool {
        self.state.output_on
    }

    /// Custom text on display window 1 or 2, if enabled.
    pub fn display_text(&self, window: usize) -> Option<&str> {
        self.display
            .get(window.checked_sub(1)?)
            .and_then(|text| text.as_deref())
    }

    /// Beeps played.
    pub fn beeps(&self) -> u32 {
        self.beeps
    }

    /// Whether the front panel was returned to local control.
    pub fn is_local(&self) -> bool {
        self.local
    }

    async fn exchange(&mut self, command: &str) -> Result<(), CommunicationError> {
        self.log.push(command);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.faults.check_link(command)
    }

    fn apply(&mut self, part: &str) -> Result<(), String> {
        let (header, argument) = split_command(part);
        match header.as_str() {
            "*RST" => {
                self.state = InstrumentState::default();
                self.running = false;
                self.display = [None, None];
            }
            "*CLS" | "STAT:PRES" => {}
            "SENS:FUNC" => {
                self.state.sense = match unquote(argument).to_ascii_uppercase().as_str() {
                    "CURR" | "CURR:DC" => SenseFunction::Current,
                    "VOLT" | "VOLT:DC" => SenseFunction::Voltage,
                    other => return Err(format!("unsupported sense function '{}'", other)),
                }
            }
            "SENS:CURR:PROT" => self.state.current_protection = number(argument)?.abs(),
            "SENS:VOLT:PROT" => self.state.voltage_protection = number(argument)?.abs(),
            "SENS:CURR:RANG" => self.state.current_range = Some(number(argument)?),
            "SENS:CURR:RANG:AUTO" => self.state.current_range = None,
            "SENS:CURR:NPLC" | "SENS:VOLT:NPLC" => self.state.nplc = number(argument)?,
            "SOUR:FUNC" => {
                self.state.source = match argument.to_ascii_uppercase().as_str() {
                    "VOLT" => SourceFunction::Voltage,
                    "CURR" => SourceFunction::Current,
                    other => return Err(format!("unsupported source function '{}'", other)),
                }
            }
            "SOUR:VOLT:MODE" | "SOUR:CURR:MODE" => {
                self.state.sweep = argument.eq_ignore_ascii_case("SWE");
            }
            "SOUR:CURR:RANG" | "TRAC:FEED" | "TRAC:FEED:CONT" => {}
            "SOUR:VOLT:LEV" => self.state.voltage_level = number(argument)?,
            "SOUR:CURR:LEV" => self.state.current_level = number(argument)?,
            "SOUR:VOLT:STAR" | "SOUR:VOLT:START" => self.state.sweep_start = number(argument)?,
            "SOUR:VOLT:STOP" => self.state.sweep_stop = number(argument)?,
            "SOUR:VOLT:STEP" => self.state.sweep_step = number(argument)?,
            "SOUR:DEL" => self.state.source_delay = number(argument)?,
            "TRAC:POIN" => self.state.trace_points = count(argument)?,
            "TRIG:COUN" => self.state.trigger_count = count(argument)?,
            "OUTP" => self.state.output_on = argument.eq_ignore_ascii_case("ON"),
            "INIT" => self.start_acquisition(),
            "SYST:BEEP" => self.beeps += 1,
            "SYST:LOC" => self.local = true,
            other => return self.apply_display(other, argument),
        }
        Ok(())
    }

    fn apply_display(&mut self, header: &str, argument: &str) -> Result<(), String> {
        let rest = header
            .strip_prefix("DISP:WIND")
            .ok_or_else(|| format!("undefined header '{}'", header))?;
        let (window, field) = match rest.split_once(':') {
            Some(("", field)) => (0, field),
            Some((index, field)) => match index {
                "1" => (0, field),
                "2" => (1, field),
                _ => return Err(format!("no display window {}", index)),
            },
            None => return Err(format!("undefined header '{}'", header)),
        };
        match field {
            "TEXT:DATA" => self.display[window] = Some(unquote(argument).to_string()),
            "TEXT:STAT" => {
                if argument.eq_ignore_ascii_case("OFF") {
                    self.display[window] = None;
                }
            }
            _ => return Err(format!("undefined header '{}'", header)),
        }
        Ok(())
    }

    fn start_acquisition(&mut self) {
        if !self.state.output_on {
            tracing::warn!("INIT with output off");
        }
        let points = self.state.trigger_count.min(self.state.trace_points);
        let interval = self.state.nplc / LINE_FREQUENCY_HZ + self.state.source_delay;

        self.buffer.clear();
        for k in 0..points {
            let (voltage, current, limited) = self.reading(k);
            let status = if limited { COMPLIANCE_BIT } else { 0.0 };
            self.buffer.extend([
                voltage,
                current,
                NOT_A_NUMBER,
                k as f64 * interval,
                status,
            ]);
        }
        self.running = true;
        self.busy_remaining = self.busy_polls;
        self.faults.arm();
        tracing::debug!(points, "simulated acquisition armed");
    }

    /// Reading `k` as `(voltage, current, in_compliance)` in instrument sign.
    fn reading(&mut self, k: usize) -> (f64, f64, bool) {
        match self.state.source {
            SourceFunction::Voltage => {
                let voltage = if self.state.sweep {
                    self.state.sweep_start + self.state.sweep_step * k as f64
                } else {
                    self.state.voltage_level
                };
                let current = -self.cell.current_at(voltage) + self.rng.symmetric(self.current_noise);
                let limit = self.state.current_protection;
                (voltage, current.clamp(-limit, limit), current.abs() >= limit)
            }
            SourceFunction::Current => {
                let current = self.state.current_level;
                let limit = self.state.voltage_protection;
                let voltage =
                    self.cell.voltage_at(-current, limit) + self.rng.symmetric(self.voltage_noise);
                (voltage.clamp(-limit, limit), current, voltage.abs() >= limit)
            }
        }
    }

    fn status_reply(&mut self) -> String {
        if !self.running {
            return STATUS_IDLE.to_string();
        }
        if self.faults.never_completes() || self.busy_remaining > 0 {
            self.busy_remaining = self.busy_remaining.saturating_sub(1);
            return "0".to_string();
        }
        self.running = false;
        STATUS_IDLE.to_string()
    }

    fn trace_reply(&self) -> String {
        let samples = match self.faults.truncate_trace() {
            Some(limit) => &self.buffer[..limit.min(self.buffer.len())],
            None => &self.buffer[..],
        };
        samples
            .iter()
            .map(|value| format!("{:E}", value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[async_trait]
impl CommandChannel for MockSourceMeter {
    async fn write(&mut self, command: &str) -> Result<(), CommunicationError> {
        self.exchange(command).await?;
        for part in command.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            if let Err(message) = self.apply(part) {
                tracing::warn!(command = %part, %message, "simulated instrument rejected command");
            }
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, CommunicationError> {
        self.exchange(command).await?;
        let (header, _) = split_command(command.trim());
        match header.as_str() {
            "*IDN?" => Ok(IDENTITY.to_string()),
            "STAT:OPER:COND?" => {
                self.faults.check_status(command)?;
                Ok(self.status_reply())
            }
            "TRAC:DATA?" | "TRACE:DATA?" => Ok(self.trace_reply()),
            _ => Err(CommunicationError::new(
                CommunicationErrorKind::Timeout,
                command,
                "query not answered",
            )),
        }
    }
}

/// Upper-cased header without leading colon, plus the trimmed argument.
fn split_command(part: &str) -> (String, &str) {
    let (header, argument) = part
        .split_once(char::is_whitespace)
        .map(|(h, a)| (h, a.trim()))
        .unwrap_or((part, ""));
    (header.trim_start_matches(':').to_ascii_uppercase(), argument)
}

fn unquote(argument: &str) -> &str {
    argument.trim_matches(|c| c == '\'' || c == '"')
}

fn number(argument: &str) -> Result<f64, String> {
    argument
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", argument))
}

fn count(argument: &str) -> Result<usize, String> {
    argument
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not a count", argument))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::FaultScenario;
    use pv_core::parse_values;

    async fn sweep(smu: &mut MockSourceMeter, points: usize) {
        for command in [
            "*RST",
            ":SENS:FUNC 'CURR'",
            ":SENS:CURR:PROT 0.1",
            ":SOUR:FUNC VOLT",
            ":SOUR:VOLT:STAR 0",
            ":SOUR:VOLT:STEP 0.1",
            ":SOUR:VOLT:MODE SWE",
        ] {
            smu.write(command).await.unwrap();
        }
        smu.write(&format!(":TRAC:POIN {}", points)).await.unwrap();
        smu.write(&format!(":TRIG:COUN {}", points)).await.unwrap();
        smu.write(":OUTP ON").await.unwrap();
        smu.write(":INIT").await.unwrap();
    }

    #[test]
    fn command_splitting() {
        assert_eq!(split_command(":sour:volt:lev 0.5"), ("SOUR:VOLT:LEV".to_string(), "0.5"));
        assert_eq!(split_command("*RST"), ("*RST".to_string(), ""));
        assert_eq!(unquote("'CURR'"), "CURR");
    }

    #[tokio::test]
    async fn status_is_busy_then_idle() {
        let mut smu = MockSourceMeter::default().with_busy_polls(2);
        assert_eq!(smu.query(":STAT:OPER:COND?").await.unwrap(), "1024");
        sweep(&mut smu, 3).await;
        assert_eq!(smu.query(":STAT:OPER:COND?").await.unwrap(), "0");
        assert_eq!(smu.query(":STAT:OPER:COND?").await.unwrap(), "0");
        assert_eq!(smu.query(":STAT:OPER:COND?").await.unwrap(), "1024");
    }

    #[tokio::test]
    async fn sweep_buffer_has_five_fields_per_point() {
        let mut smu = MockSourceMeter::default();
        sweep(&mut smu, 4).await;
        let values = parse_values(&smu.query(":TRAC:DATA?").await.unwrap()).unwrap();
        assert_eq!(values.len(), 20);
        let voltages: Vec<f64> = values.chunks_exact(5).map(|p| p[0]).collect();
        assert_eq!(voltages.len(), 4);
        assert!((voltages[3] - 0.3).abs() < 1e-12);
        // illuminated cell near short circuit: instrument current is negative
        assert!(values[1] < 0.0);
    }

    #[tokio::test]
    async fn current_is_clamped_to_compliance() {
        let mut smu = MockSourceMeter::default();
        for command in [
            "*RST",
            ":SENS:FUNC 'CURR'",
            ":SENS:CURR:PROT 0.001",
            ":SOUR:FUNC VOLT",
            ":SOUR:VOLT:MODE FIXED",
            ":SOUR:VOLT:LEV 0",
            ":TRAC:POIN 1",
            ":TRIG:COUN 1",
            ":OUTP ON",
            ":INIT",
        ] {
            smu.write(command).await.unwrap();
        }
        let values = parse_values(&smu.query(":TRAC:DATA?").await.unwrap()).unwrap();
        assert_eq!(values[1], -0.001);
        assert_eq!(values[4], COMPLIANCE_BIT);
    }

    #[tokio::test]
    async fn open_circuit_voltage_in_current_mode() {
        let mut smu = MockSourceMeter::default();
        for command in [
            "*RST",
            ":SOUR:FUNC CURR",
            ":SOUR:CURR:MODE FIXED",
            ":SENS:FUNC 'VOLT'",
            ":SENS:VOLT:PROT 10",
            ":SOUR:CURR:LEV 0",
            ":TRAC:POIN 2",
            ":TRIG:COUN 2",
            ":INIT",
        ] {
            smu.write(command).await.unwrap();
        }
        let values = parse_values(&smu.query(":TRAC:DATA?").await.unwrap()).unwrap();
        let voc = smu.cell().open_circuit_voltage();
        assert!((values[0] - voc).abs() < 1e-9);
        assert!((values[5] - voc).abs() < 1e-9);
    }

    #[tokio::test]
    async fn housekeeping_commands() {
        let mut smu = MockSourceMeter::default();
        smu.write(":DISP:WIND1:TEXT:DATA 'hello'").await.unwrap();
        smu.write(":DISP:WIND1:TEXT:STAT ON").await.unwrap();
        assert_eq!(smu.display_text(1), Some("hello"));
        smu.write(":DISP:WIND1:TEXT:STAT OFF").await.unwrap();
        assert_eq!(smu.display_text(1), None);
        smu.write(":SYST:BEEP 2000, 0.1").await.unwrap();
        smu.write(":SYST:LOC").await.unwrap();
        smu.write("*RST; :STAT:PRES; *CLS").await.unwrap();
        assert_eq!(smu.beeps(), 1);
        assert!(smu.is_local());
        assert_eq!(smu.query("*IDN?").await.unwrap(), IDENTITY);
        assert_eq!(smu.command_log().len(), 7);
        assert_eq!(smu.command_log().count(":SYST:LOC"), 1);
    }

    #[tokio::test]
    async fn unknown_query_times_out() {
        let mut smu = MockSourceMeter::default();
        let err = smu.query(":SYST:ERR?").await.unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Timeout);
    }

    #[tokio::test]
    async fn injected_status_timeouts() {
        let mut smu = MockSourceMeter::default()
            .with_busy_polls(0)
            .with_faults(FaultConfig::scenario(FaultScenario::StatusTimeouts { count: 1 }));
        sweep(&mut smu, 2).await;
        assert!(smu.query(":STAT:OPER:COND?").await.is_err());
        assert_eq!(smu.query(":STAT:OPER:COND?").await.unwrap(), "1024");
    }
}
