//! Measurement sequencing for the Keithley 2400 source-measure unit.
//!
//! [`SweepProtocol`] owns its [`CommandChannel`] exclusively. Every operation
//! runs the same acquisition: configure, arm, wait for completion, fetch the
//! trace buffer, switch the output off, decode.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pv_core::serial::SerialChannel;
//! use pv_driver_keithley::SweepProtocol;
//!
//! let channel = SerialChannel::open(&settings.instrument).await?;
//! let mut smu = SweepProtocol::new(channel);
//! let trace = smu.measure_voltage_sweep(&settings.sweep.configuration()?).await?;
//! ```

use crate::commands::{self, DisplayWindow};
use crate::completion::{AbortHandle, CompletionPoller, CompletionSettings};
use crate::decoder::{decode, RawTraceBuffer, FIELDS_PER_POINT};
use pv_core::sweep::{validate_compliance, validate_nplc, validate_point_count};
use pv_core::{
    CommandChannel, ConfigurationError, CurrentRange, SweepConfiguration, SweepError, Trace,
};
use tracing::instrument;

/// Points averaged by the open-circuit voltage monitor.
pub const VOC_MONITOR_POINTS: usize = 5;
/// Voltage compliance of the open-circuit voltage monitor.
pub const VOC_MONITOR_COMPLIANCE: f64 = 10.0;
/// Integration time of the open-circuit voltage monitor.
pub const VOC_MONITOR_NPLC: f64 = 5.0;

/// Beep played after a voltage sweep when enabled.
const COMPLETION_BEEP: (f64, f64) = (2000.0, 0.1);

/// Optional behaviour of the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Sound the beeper after every voltage sweep.
    pub beep_on_complete: bool,
}

/// Command sequencing for one instrument.
#[derive(Debug)]
pub struct SweepProtocol<C> {
    channel: C,
    completion: CompletionSettings,
    options: ProtocolOptions,
    abort: AbortHandle,
}

impl<C: CommandChannel> SweepProtocol<C> {
    /// Take ownership of a channel; default completion settings.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            completion: CompletionSettings::default(),
            options: ProtocolOptions::default(),
            abort: AbortHandle::new(),
        }
    }

    /// Replace the completion settings.
    pub fn with_completion(mut self, completion: CompletionSettings) -> Self {
        self.completion = completion;
        self
    }

    /// Replace the protocol options.
    pub fn with_options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle that aborts the running (or next) acquisition.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Current completion settings.
    pub fn completion_settings(&self) -> &CompletionSettings {
        &self.completion
    }

    /// Give the channel back.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Identification string.
    #[instrument(skip(self))]
    pub async fn identify(&mut self) -> Result<String, SweepError> {
        Ok(self.channel.query(commands::IDENTIFY).await?)
    }

    /// Reset the instrument, its status system and error queue.
    #[instrument(skip(self))]
    pub async fn reset(&mut self) -> Result<(), SweepError> {
        Ok(self.channel.write(commands::FULL_RESET).await?)
    }

    /// Source a constant voltage and record `points` current readings.
    #[instrument(skip(self), err)]
    pub async fn measure_constant_voltage_current(
        &mut self,
        points: usize,
        compliance_amps: f64,
        source_volts: f64,
        nplc: f64,
    ) -> Result<Trace, SweepError> {
        validate_fixed_source(points, compliance_amps, "source_volts", source_volts, nplc)?;
        let setup = commands::constant_voltage_setup(points, compliance_amps, source_volts, nplc);
        self.acquire(setup, points).await
    }

    /// Source a constant current (lowest source range) and record `points`
    /// voltage readings.
    #[instrument(skip(self), err)]
    pub async fn measure_constant_current_voltage(
        &mut self,
        points: usize,
        compliance_volts: f64,
        source_amps: f64,
        nplc: f64,
    ) -> Result<Trace, SweepError> {
        validate_fixed_source(points, compliance_volts, "source_amps", source_amps, nplc)?;
        let setup = commands::constant_current_setup(points, compliance_volts, source_amps, nplc);
        self.acquire(setup, points).await
    }

    /// Run a staircase voltage sweep.
    #[instrument(
        skip(self, config),
        fields(
            start = config.start_voltage(),
            end = config.end_voltage(),
            step = config.step_voltage(),
            points = config.number_of_points()
        ),
        err
    )]
    pub async fn measure_voltage_sweep(
        &mut self,
        config: &SweepConfiguration,
    ) -> Result<Trace, SweepError> {
        let setup = commands::voltage_sweep_setup(config);
        let trace = self.acquire(setup, config.number_of_points()).await?;
        if self.options.beep_on_complete {
            let (frequency, duration) = COMPLETION_BEEP;
            if let Err(err) = self.beep(frequency, duration).await {
                tracing::warn!(error = %err, "completion beep failed");
            }
        }
        Ok(trace)
    }

    /// Validate positional sweep arguments and run the sweep.
    #[allow(clippy::too_many_arguments)]
    pub async fn measure_voltage_sweep_with(
        &mut self,
        start_voltage: f64,
        end_voltage: f64,
        step_voltage: f64,
        compliance_current: f64,
        current_range: CurrentRange,
        nplc: f64,
        delay_seconds: f64,
    ) -> Result<Trace, SweepError> {
        let config = SweepConfiguration::new(
            start_voltage,
            end_voltage,
            step_voltage,
            compliance_current,
            current_range,
            nplc,
            delay_seconds,
        )?;
        self.measure_voltage_sweep(&config).await
    }

    /// Mean of a few voltage readings at zero current.
    #[instrument(skip(self))]
    pub async fn monitor_open_circuit_voltage(&mut self) -> Result<f64, SweepError> {
        let trace = self
            .measure_constant_current_voltage(
                VOC_MONITOR_POINTS,
                VOC_MONITOR_COMPLIANCE,
                0.0,
                VOC_MONITOR_NPLC,
            )
            .await?;
        trace
            .mean_voltage()
            .ok_or(SweepError::UnexpectedBufferLength {
                expected: VOC_MONITOR_POINTS * FIELDS_PER_POINT,
                actual: 0,
            })
    }

    /// Show text on the main display line.
    pub async fn display_text(&mut self, text: &str) -> Result<(), SweepError> {
        self.show(DisplayWindow::Main, text).await
    }

    /// Show text on the secondary display line.
    pub async fn display_subtext(&mut self, text: &str) -> Result<(), SweepError> {
        self.show(DisplayWindow::Sub, text).await
    }

    /// Return both display lines to normal readings.
    pub async fn clear_display(&mut self) -> Result<(), SweepError> {
        for window in [DisplayWindow::Main, DisplayWindow::Sub] {
            self.channel.write(&commands::clear_display(window)).await?;
        }
        Ok(())
    }

    /// Sound the beeper.
    pub async fn beep(&mut self, frequency_hz: f64, duration_s: f64) -> Result<(), SweepError> {
        Ok(self
            .channel
            .write(&commands::beep(frequency_hz, duration_s))
            .await?)
    }

    /// Return the front panel to local control.
    pub async fn set_local(&mut self) -> Result<(), SweepError> {
        Ok(self.channel.write(commands::LOCAL).await?)
    }

    async fn show(&mut self, window: DisplayWindow, text: &str) -> Result<(), SweepError> {
        for command in commands::display_text(window, text) {
            self.channel.write(&command).await?;
        }
        Ok(())
    }

    async fn acquire(&mut self, setup: Vec<String>, points: usize) -> Result<Trace, SweepError> {
        if self.abort.is_aborted() {
            self.abort.reset();
            return Err(SweepError::Aborted);
        }

        for command in &setup {
            self.channel.write(command).await?;
        }
        for command in commands::START_ACQUISITION {
            self.channel.write(command).await?;
        }
        tracing::info!(points, "acquisition started");

        let poller = CompletionPoller::new(&self.completion, &self.abort);
        let report = match poller.wait(&mut self.channel).await {
            Ok(report) => report,
            Err(err) => {
                if err.is_interrupted() {
                    self.shut_down_output().await;
                    if matches!(err, SweepError::Aborted) {
                        self.abort.reset();
                    }
                }
                return Err(err);
            }
        };
        tracing::info!(
            polls = report.polls,
            transient_failures = report.transient_failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "acquisition complete"
        );

        let raw = RawTraceBuffer::new(self.channel.query_values(commands::FETCH_TRACE).await?);
        for command in commands::FINISH_ACQUISITION {
            self.channel.write(command).await?;
        }

        let expected = points * FIELDS_PER_POINT;
        let actual = raw.len();
        let trace = decode(raw)?;
        if trace.len() != points {
            return Err(SweepError::UnexpectedBufferLength { expected, actual });
        }
        tracing::debug!(points = trace.len(), "trace decoded");
        Ok(trace)
    }

    /// Best-effort output off after an interrupted acquisition.
    async fn shut_down_output(&mut self) {
        for command in commands::FINISH_ACQUISITION {
            if let Err(err) = self.channel.write(command).await {
                tracing::warn!(error = %err, "cleanup after interrupted acquisition failed");
            }
        }
    }
}

fn validate_fixed_source(
    points: usize,
    compliance: f64,
    source_name: &'static str,
    source_value: f64,
    nplc: f64,
) -> Result<(), ConfigurationError> {
    validate_point_count(points)?;
    validate_compliance(compliance)?;
    if !source_value.is_finite() {
        return Err(ConfigurationError::NotFinite {
            name: source_name,
            value: source_value,
        });
    }
    validate_nplc(nplc)
}
