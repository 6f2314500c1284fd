//! Application settings.
//!
//! Settings are layered with `figment`: library defaults, then an optional
//! TOML file, then `PV_SWEEP_`-prefixed environment variables (nested keys are
//! separated by a double underscore, e.g. `PV_SWEEP_INSTRUMENT__PORT`).
//!
//! ```toml
//! log_level = "info"
//!
//! [instrument]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [sweep]
//! start_voltage = -0.2
//! end_voltage = 1.2
//! step_voltage = 0.01
//! compliance_current = 0.1
//!
//! [completion]
//! timeout_s = 120.0
//! mode = "idle_bit"
//!
//! [analysis]
//! current_sign = "instrument"
//! cell_area_cm2 = 0.16
//! irradiance_mw_cm2 = 100.0
//!
//! [simulation]
//! latency_ms = 5
//! status_failure_rate = 0.05
//! seed = 7
//! ```

use crate::sweep::{validate_compliance, SweepParameters};
use crate::trace::CurrentSign;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PV_SWEEP_";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Longest accepted completion timeout (one day).
pub const MAX_TIMEOUT_S: f64 = 86_400.0;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Serial transport.
    pub instrument: InstrumentSettings,
    /// Default sweep.
    pub sweep: SweepParameters,
    /// Completion polling.
    pub completion: CompletionConfig,
    /// Curve analysis and derived figures.
    pub analysis: AnalysisSettings,
    /// Simulated instrument behaviour, used with `instrument.mock`.
    pub simulation: SimulationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            instrument: InstrumentSettings::default(),
            sweep: SweepParameters::default(),
            completion: CompletionConfig::default(),
            analysis: AnalysisSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl Settings {
    /// Build the layered figment without extracting it.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings.
    ///
    /// A missing file is an error when a path is given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("settings file not found: {}", path.display());
            }
        }
        let settings: Settings = Self::figment(path)
            .extract()
            .context("Failed to parse settings")?;
        settings.validate()?;
        tracing::debug!(?path, "settings loaded");
        Ok(settings)
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid log_level '{}', expected one of {:?}",
                self.log_level,
                LOG_LEVELS
            );
        }
        if !self.instrument.mock && self.instrument.port.trim().is_empty() {
            anyhow::bail!("instrument.port must not be empty");
        }
        if self.instrument.baud_rate == 0 {
            anyhow::bail!("instrument.baud_rate must be positive");
        }
        if self.instrument.read_timeout_ms == 0 || self.instrument.write_timeout_ms == 0 {
            anyhow::bail!("instrument timeouts must be positive");
        }
        validate_compliance(self.sweep.compliance_current).context("sweep.compliance_current")?;
        if !(self.completion.timeout_s > 0.0 && self.completion.timeout_s.is_finite()) {
            anyhow::bail!("completion.timeout_s must be positive");
        }
        if self.completion.timeout_s > MAX_TIMEOUT_S {
            anyhow::bail!(
                "completion.timeout_s must not exceed {} s, got {}",
                MAX_TIMEOUT_S,
                self.completion.timeout_s
            );
        }
        if !(self.analysis.cell_area_cm2 > 0.0 && self.analysis.cell_area_cm2.is_finite()) {
            anyhow::bail!("analysis.cell_area_cm2 must be positive");
        }
        if !(self.analysis.irradiance_mw_cm2 >= 0.0 && self.analysis.irradiance_mw_cm2.is_finite())
        {
            anyhow::bail!("analysis.irradiance_mw_cm2 must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.simulation.status_failure_rate) {
            anyhow::bail!(
                "simulation.status_failure_rate must be within 0..=1, got {}",
                self.simulation.status_failure_rate
            );
        }
        Ok(())
    }
}

/// Simulated instrument knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Delay added to every exchange.
    pub latency_ms: u64,
    /// Probability that a status query times out.
    pub status_failure_rate: f64,
    /// Seed for noise and injected failures; entropy when unset.
    pub seed: Option<u64>,
}

/// Serial connection to the source-measure unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Name used in log messages.
    pub name: String,
    /// Serial device path.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Line terminator appended to every command.
    pub terminator: String,
    /// Reply timeout.
    pub read_timeout_ms: u64,
    /// Write timeout.
    pub write_timeout_ms: u64,
    /// Quiet window used to flush stale input before a query; 0 disables.
    pub drain_ms: u64,
    /// Use the simulated instrument instead of the serial port.
    pub mock: bool,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            name: "Keithley 2400".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            terminator: "\n".to_string(),
            read_timeout_ms: 2000,
            write_timeout_ms: 1000,
            drain_ms: 10,
            mock: false,
        }
    }
}

/// How sweep completion is recognised from the status register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Done when `idle_mask` bits are set.
    #[default]
    IdleBit,
    /// Done when the reply differs from the one read right after triggering.
    StatusChanged,
}

/// Completion polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Deadline for one acquisition.
    pub timeout_s: f64,
    /// Wait after a failed status query.
    pub backoff_ms: u64,
    /// Completion criterion.
    pub mode: CompletionMode,
    /// Bits that signal an idle instrument in `IdleBit` mode.
    pub idle_mask: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            timeout_s: 300.0,
            backoff_ms: 100,
            mode: CompletionMode::IdleBit,
            idle_mask: 1 << 10,
        }
    }
}

/// Analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Sign convention of measured current.
    pub current_sign: CurrentSign,
    /// Active cell area (cm²).
    pub cell_area_cm2: f64,
    /// Illumination (mW/cm²); 0 for dark measurements.
    pub irradiance_mw_cm2: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            current_sign: CurrentSign::Instrument,
            cell_area_cm2: 1.0,
            irradiance_mw_cm2: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::ScanDirection;
    use std::io::Write;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.completion.idle_mask, 1024);
        assert_eq!(settings.completion.backoff_ms, 100);
        assert_eq!(settings.analysis.current_sign, CurrentSign::Instrument);
    }

    #[test]
    fn file_overrides_defaults_per_field() {
        let file = write_settings(
            r#"
            log_level = "debug"

            [instrument]
            port = "/dev/ttyS3"

            [sweep]
            start_voltage = 0.0
            end_voltage = 0.8
            direction = "reverse"

            [completion]
            mode = "status_changed"
            "#,
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.instrument.port, "/dev/ttyS3");
        assert_eq!(settings.instrument.baud_rate, 9600);
        assert_eq!(settings.sweep.end_voltage, 0.8);
        assert_eq!(settings.sweep.step_voltage, 0.01);
        assert_eq!(settings.sweep.direction, ScanDirection::Reverse);
        assert_eq!(settings.completion.mode, CompletionMode::StatusChanged);
    }

    #[test]
    fn rejects_invalid_values() {
        let file = write_settings("log_level = \"loud\"\n");
        assert!(Settings::load(Some(file.path())).is_err());

        let file = write_settings("[sweep]\ncompliance_current = -1.0\n");
        assert!(Settings::load(Some(file.path())).is_err());

        let file = write_settings("[analysis]\ncell_area_cm2 = 0.0\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn simulation_section() {
        let file = write_settings(
            "[simulation]\nlatency_ms = 5\nstatus_failure_rate = 0.25\nseed = 11\n",
        );
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(
            settings.simulation,
            SimulationSettings {
                latency_ms: 5,
                status_failure_rate: 0.25,
                seed: Some(11),
            }
        );
        assert_eq!(Settings::default().simulation, SimulationSettings::default());

        let file = write_settings("[simulation]\nstatus_failure_rate = 1.5\n");
        assert!(Settings::load(Some(file.path())).is_err());
        let file = write_settings("[simulation]\nstatus_failure_rate = nan\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn rejects_timeout_beyond_a_duration() {
        let file = write_settings("[completion]\ntimeout_s = 1e30\n");
        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("timeout_s"));

        let mut settings = Settings::default();
        settings.completion.timeout_s = MAX_TIMEOUT_S;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn empty_port_allowed_for_mock() {
        let mut settings = Settings::default();
        settings.instrument.port.clear();
        assert!(settings.validate().is_err());
        settings.instrument.mock = true;
        settings.validate().unwrap();
    }
}
