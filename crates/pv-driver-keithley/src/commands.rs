//! Keithley 2400 SCPI command builders.
//!
//! Builders are pure: they return the ordered command lines for one phase of
//! an acquisition and never touch the transport.
//!
//! Acquisition order:
//! 1. `*RST`
//! 2. sense function, protection, range, integration time
//! 3. source function and level (or sweep limits)
//! 4. trace buffer feed and size
//! 5. trigger count (and source delay for sweeps)
//! 6. `:OUTP ON`, `:INIT`
//! 7. poll `:STAT:OPER:COND?`
//! 8. `:TRAC:DATA?`
//! 9. `:OUTP OFF`, `*RST`

use pv_core::{CurrentRange, SweepConfiguration};

/// Reset to power-on defaults.
pub const RESET: &str = "*RST";
/// Reset including the status subsystem and error queue.
pub const FULL_RESET: &str = "*RST; :STAT:PRES; *CLS";
/// Identification query.
pub const IDENTIFY: &str = "*IDN?";
/// Operation condition register query used for completion polling.
pub const STATUS_QUERY: &str = ":STAT:OPER:COND?";
/// Fetch the trace buffer.
pub const FETCH_TRACE: &str = ":TRAC:DATA?";
/// Turn the output on and arm the trigger model.
pub const START_ACQUISITION: [&str; 2] = [":OUTP ON", ":INIT"];
/// Turn the output off and return to defaults.
pub const FINISH_ACQUISITION: [&str; 2] = [":OUTP OFF", RESET];
/// Return the front panel to local control.
pub const LOCAL: &str = ":SYST:LOC";

/// Front-panel display window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayWindow {
    /// Top line.
    Main,
    /// Bottom line.
    Sub,
}

impl DisplayWindow {
    fn index(self) -> u8 {
        match self {
            DisplayWindow::Main => 1,
            DisplayWindow::Sub => 2,
        }
    }
}

/// Source a fixed voltage, measure current.
pub fn constant_voltage_setup(
    points: usize,
    compliance_amps: f64,
    source_volts: f64,
    nplc: f64,
) -> Vec<String> {
    let mut commands = vec![
        RESET.to_string(),
        ":SENS:FUNC 'CURR'".to_string(),
        format!(":SENS:CURR:PROT {}", compliance_amps),
        format!(":SENS:CURR:NPLC {}", nplc),
        ":SOUR:FUNC VOLT".to_string(),
        ":SOUR:VOLT:MODE FIXED".to_string(),
        format!(":SOUR:VOLT:LEV {}", source_volts),
    ];
    commands.extend(trace_setup(points));
    commands.push(format!(":TRIG:COUN {}", points));
    commands
}

/// Source a fixed current on the lowest range, measure voltage.
pub fn constant_current_setup(
    points: usize,
    compliance_volts: f64,
    source_amps: f64,
    nplc: f64,
) -> Vec<String> {
    let mut commands = vec![
        RESET.to_string(),
        ":SENS:FUNC 'VOLT'".to_string(),
        format!(":SENS:VOLT:PROT {}", compliance_volts),
        format!(":SENS:VOLT:NPLC {}", nplc),
        ":SOUR:FUNC CURR".to_string(),
        ":SOUR:CURR:MODE FIXED".to_string(),
        ":SOUR:CURR:RANG MIN".to_string(),
        format!(":SOUR:CURR:LEV {}", source_amps),
    ];
    commands.extend(trace_setup(points));
    commands.push(format!(":TRIG:COUN {}", points));
    commands
}

/// Staircase voltage sweep, measure current.
pub fn voltage_sweep_setup(config: &SweepConfiguration) -> Vec<String> {
    let points = config.number_of_points();
    let mut commands = vec![
        RESET.to_string(),
        ":SENS:FUNC 'CURR'".to_string(),
        format!(":SENS:CURR:PROT {}", config.compliance_current()),
        match config.current_range() {
            CurrentRange::Fixed(amps) => format!(":SENS:CURR:RANG {}", amps),
            CurrentRange::Auto => ":SENS:CURR:RANG:AUTO ON".to_string(),
        },
        format!(":SENS:CURR:NPLC {}", config.integration_time_nplc()),
        ":SOUR:FUNC VOLT".to_string(),
        format!(":SOUR:VOLT:STAR {}", config.start_voltage()),
        format!(":SOUR:VOLT:STOP {}", config.end_voltage()),
        format!(":SOUR:VOLT:STEP {}", config.step_voltage()),
        ":SOUR:VOLT:MODE SWE".to_string(),
    ];
    commands.extend(trace_setup(points));
    commands.push(format!(":TRIG:COUN {}", points));
    commands.push(format!(":SOUR:DEL {}", config.delay().as_secs_f64()));
    commands
}

fn trace_setup(points: usize) -> [String; 3] {
    [
        ":TRAC:FEED SENS".to_string(),
        format!(":TRAC:POIN {}", points),
        ":TRAC:FEED:CONT NEXT".to_string(),
    ]
}

/// Show `text` on a display window. Single quotes are removed.
pub fn display_text(window: DisplayWindow, text: &str) -> [String; 2] {
    let text: String = text.chars().filter(|&c| c != '\'').collect();
    [
        format!(":DISP:WIND{}:TEXT:DATA '{}'", window.index(), text),
        format!(":DISP:WIND{}:TEXT:STAT ON", window.index()),
    ]
}

/// Return a display window to normal readings.
pub fn clear_display(window: DisplayWindow) -> String {
    format!(":DISP:WIND{}:TEXT:STAT OFF", window.index())
}

/// Sound the beeper.
pub fn beep(frequency_hz: f64, duration_s: f64) -> String {
    format!(":SYST:BEEP {}, {}", frequency_hz, duration_s)
}
