//! CLI entry point for photovoltaic I-V characterization.
//!
//! Drives a Keithley 2400 over RS-232 (or the simulated instrument with
//! `--mock`) and prints the curve metrics.
//!
//! # Usage
//!
//! Full sweep with the configured parameters:
//! ```bash
//! pv-sweep --config sweep.toml iv
//! ```
//!
//! Reverse scan from 1.0 V to -0.1 V, JSON output:
//! ```bash
//! pv-sweep iv --start -0.1 --end 1.0 --reverse --json
//! ```
//!
//! Watch the open-circuit voltage:
//! ```bash
//! pv-sweep --mock voc --count 10
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pv_analysis::{
    voc_reached, AnalysisError, CurveAnalyzer, CurveMetrics, PhotovoltaicFigures,
};
use pv_core::serial::SerialChannel;
use pv_core::{
    AnalysisSettings, CommandChannel, ScanDirection, Settings, SimulationSettings, Trace,
};
use pv_driver_keithley::{CompletionSettings, SweepProtocol};
use pv_driver_mock::{FaultConfig, MockSourceMeter, SolarCell};
use serde::Serialize;
use std::fmt::LowerExp;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Current noise of the simulated instrument (A).
const MOCK_CURRENT_NOISE: f64 = 2e-6;
/// Voltage noise of the simulated instrument (V).
const MOCK_VOLTAGE_NOISE: f64 = 1e-4;

type Smu = SweepProtocol<Box<dyn CommandChannel>>;

#[derive(Parser)]
#[command(name = "pv-sweep")]
#[command(about = "Photovoltaic I-V sweeps with a source-measure unit", long_about = None)]
struct Cli {
    /// Settings file (TOML); `PV_SWEEP_*` environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated instrument instead of the serial port
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identification
    Identify,

    /// Run a voltage sweep and analyse the I-V curve
    Iv {
        /// Start voltage (V)
        #[arg(long, allow_hyphen_values = true)]
        start: Option<f64>,

        /// End voltage (V)
        #[arg(long, allow_hyphen_values = true)]
        end: Option<f64>,

        /// Step magnitude (V)
        #[arg(long)]
        step: Option<f64>,

        /// Scan from end to start
        #[arg(long)]
        reverse: bool,

        /// Print trace, metrics and figures as JSON
        #[arg(long)]
        json: bool,
    },

    /// Measure the open-circuit voltage repeatedly
    Voc {
        /// Number of readings
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Serialize)]
struct SweepReport<'a> {
    trace: &'a Trace,
    metrics: &'a CurveMetrics,
    figures: Option<PhotovoltaicFigures>,
    voc_reached: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.mock {
        settings.instrument.mock = true;
    }
    init_logging(&settings.log_level);

    let channel = open_channel(&settings).await?;
    let mut smu: Smu = SweepProtocol::new(channel)
        .with_completion(CompletionSettings::from(&settings.completion));

    let abort = smu.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting acquisition");
            abort.abort();
        }
    });

    match cli.command {
        Commands::Identify => {
            let identity = smu.identify().await.context("identification failed")?;
            println!("{}", identity.trim());
            Ok(())
        }
        Commands::Iv {
            start,
            end,
            step,
            reverse,
            json,
        } => {
            let mut sweep = settings.sweep.clone();
            if let Some(start) = start {
                sweep.start_voltage = start;
            }
            if let Some(end) = end {
                sweep.end_voltage = end;
            }
            if let Some(step) = step {
                sweep.step_voltage = step;
            }
            if reverse {
                sweep.direction = ScanDirection::Reverse;
            }
            settings.sweep = sweep;
            run_iv(&mut smu, &settings, json).await
        }
        Commands::Voc { count } => run_voc(&mut smu, count).await,
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_channel(settings: &Settings) -> Result<Box<dyn CommandChannel>> {
    if settings.instrument.mock {
        tracing::info!(simulation = ?settings.simulation, "using simulated source-measure unit");
        return Ok(Box::new(simulated_instrument(&settings.simulation)));
    }
    let channel = SerialChannel::open(&settings.instrument)
        .await
        .with_context(|| format!("failed to open {}", settings.instrument.port))?;
    Ok(Box::new(channel))
}

fn simulated_instrument(simulation: &SimulationSettings) -> MockSourceMeter {
    let mut smu = MockSourceMeter::new(SolarCell::default())
        .with_noise(MOCK_CURRENT_NOISE, MOCK_VOLTAGE_NOISE, simulation.seed)
        .with_latency(Duration::from_millis(simulation.latency_ms));
    if simulation.status_failure_rate > 0.0 {
        smu = smu.with_faults(FaultConfig::random_status_failures_seeded(
            simulation.status_failure_rate,
            simulation.seed,
        ));
    }
    smu
}

async fn run_iv(smu: &mut Smu, settings: &Settings, json: bool) -> Result<()> {
    let sweep = &settings.sweep;
    if !sweep.crosses_zero() {
        tracing::warn!(
            start = sweep.start_voltage,
            end = sweep.end_voltage,
            "sweep does not cross 0 V, short-circuit values are extrapolated"
        );
    }
    let config = sweep.configuration().context("invalid sweep parameters")?;

    let trace = smu
        .measure_voltage_sweep(&config)
        .await
        .context("voltage sweep failed")?;

    let analysis = &settings.analysis;
    let metrics = CurveAnalyzer::new(config.compliance_current())
        .with_current_sign(analysis.current_sign)
        .analyze(&trace);
    let figures = PhotovoltaicFigures::from_metrics(
        &metrics,
        analysis.cell_area_cm2,
        analysis.irradiance_mw_cm2,
    );
    let reached = reached_open_circuit(&trace, &metrics);
    if !reached && expects_open_circuit(analysis) {
        tracing::warn!("sweep did not pass through open circuit");
    }

    if json {
        let report = SweepReport {
            trace: &trace,
            metrics: &metrics,
            figures: figures.as_ref().ok().copied(),
            voc_reached: reached,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("points                 {}", trace.len());
    println!("Jsc (A)                {}", show(&metrics.short_circuit_current));
    println!("Voc (V)                {}", show(&metrics.open_circuit_voltage));
    println!("fill factor            {}", show(&metrics.fill_factor));
    match &metrics.max_power {
        Ok(mpp) => println!(
            "Pmax (W)               {:.6e} at {:.4} V, {:.6e} A",
            mpp.power, mpp.voltage, mpp.current
        ),
        Err(err) => println!("Pmax (W)               n/a ({})", err),
    }
    match &metrics.series_resistance {
        Ok(rs) => match rs.ohms() {
            Some(ohms) => println!("Rs (ohm)               {:.6e}", ohms),
            None => println!("Rs (ohm)               not found"),
        },
        Err(err) => println!("Rs (ohm)               n/a ({})", err),
    }
    println!("Rp (ohm)               {}", show(&metrics.parallel_resistance));
    match figures {
        Ok(figures) => {
            println!("Jsc (mA/cm2)           {:.4}", figures.jsc_density_ma_cm2);
            println!("Jmpp (mA/cm2)          {:.4}", figures.max_power_current_density_ma_cm2);
            println!("efficiency (%)         {:.3}", figures.efficiency_percent);
        }
        Err(err) => println!("figures                n/a ({})", err),
    }
    Ok(())
}

async fn run_voc(smu: &mut Smu, count: usize) -> Result<()> {
    for reading in 1..=count {
        let voc = smu
            .monitor_open_circuit_voltage()
            .await
            .context("open-circuit measurement failed")?;
        println!("{:>4}  {:.6} V", reading, voc);
        if let Err(err) = smu.display_text(&format!("Voc {:.4} V", voc)).await {
            tracing::warn!(error = %err, "front panel update failed");
        }
    }
    smu.clear_display().await?;
    smu.set_local().await?;
    Ok(())
}

fn reached_open_circuit(trace: &Trace, metrics: &CurveMetrics) -> bool {
    match &metrics.open_circuit_voltage {
        Ok(voc) => voc_reached(trace, *voc),
        Err(_) => false,
    }
}

/// Dark curves have no open-circuit point to reach.
fn expects_open_circuit(analysis: &AnalysisSettings) -> bool {
    analysis.irradiance_mw_cm2 > 0.0
}

fn show<T: LowerExp>(value: &Result<T, AnalysisError>) -> String {
    match value {
        Ok(value) => format!("{:.6e}", value),
        Err(err) => format!("n/a ({})", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dark_trace() -> Trace {
        Trace::from_points((0..=5).map(|k| {
            let v = 0.1 * k as f64;
            (v, -1e-9 * (v / 0.026).exp())
        }))
    }

    fn lit_trace() -> Trace {
        Trace::from_points((0..=10).map(|k| {
            let v = 0.1 * k as f64;
            (v, 0.03 - 0.03 * v / 0.6)
        }))
    }

    #[test]
    fn dark_curve_is_not_flagged() {
        let trace = dark_trace();
        let metrics = CurveAnalyzer::new(0.1).analyze(&trace);
        assert!(!reached_open_circuit(&trace, &metrics));

        let mut analysis = AnalysisSettings::default();
        analysis.irradiance_mw_cm2 = 0.0;
        assert!(!expects_open_circuit(&analysis));
        analysis.irradiance_mw_cm2 = 100.0;
        assert!(expects_open_circuit(&analysis));
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_settings_shape_the_instrument() {
        let simulation = SimulationSettings {
            latency_ms: 20,
            status_failure_rate: 0.3,
            seed: Some(7),
        };
        let channel: Box<dyn CommandChannel> = Box::new(simulated_instrument(&simulation));
        let mut smu: Smu = SweepProtocol::new(channel).with_completion(CompletionSettings {
            backoff: Duration::from_millis(1),
            ..CompletionSettings::default()
        });

        let started = tokio::time::Instant::now();
        let identity = smu.identify().await.unwrap();
        assert!(identity.contains("2400"));
        assert!(started.elapsed() >= Duration::from_millis(20));

        let mut settings = Settings::default();
        settings.sweep.start_voltage = -0.1;
        settings.sweep.end_voltage = 0.8;
        settings.sweep.step_voltage = 0.05;
        let config = settings.sweep.configuration().unwrap();
        let trace = smu.measure_voltage_sweep(&config).await.unwrap();
        assert_eq!(trace.len(), config.number_of_points());
    }

    #[test]
    fn illuminated_curve_reaches_open_circuit() {
        let trace = lit_trace();
        let metrics = CurveAnalyzer::new(0.1).analyze(&trace);
        assert!(reached_open_circuit(&trace, &metrics));
    }
}
