//! CLI entry point for smu-sweep
//!
//! Provides a command-line front end to the run controller:
//! - listing serial devices
//! - running one sweep and printing live telemetry as JSON lines
//!
//! # Usage
//!
//! ```bash
//! smu-sweep ports
//! smu-sweep sweep --port /dev/ttyUSB0 --start 0 --end 1 --step 0.1 --save-mode realtime
//! smu-sweep --config lab.toml sweep --mock
//! ```
//!
//! Ctrl-C during a sweep requests a stop; the instrument output is still switched off and
//! buffered points are still saved before the process exits.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use smu_sweep::{
    app::ControllerHandle,
    app_actor::RunController,
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    core::{SaveMode, WireMode},
    data::TsvStore,
    instrument::{Connector, MockConnector, MockInstrument, SettleTiming},
    telemetry::TelemetryEvent,
};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smu-sweep")]
#[command(about = "Source-measure unit sweep controller", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the scripted instrument instead of a serial device
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial devices
    Ports,

    /// Initialize the instrument and run one sweep
    Sweep(SweepArgs),
}

#[derive(clap::Args, Default)]
struct SweepArgs {
    /// Serial device (defaults to the configured port, then the first device found)
    #[arg(long)]
    port: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    start: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    end: Option<f64>,
    #[arg(long)]
    step: Option<f64>,
    /// batch | realtime
    #[arg(long)]
    save_mode: Option<String>,
    /// 2wire | 4wire
    #[arg(long)]
    wire_mode: Option<String>,
    #[arg(long)]
    voltage_limit: Option<f64>,
    #[arg(long)]
    current_limit: Option<f64>,
    /// 1, 3, 5 or 10
    #[arg(long)]
    average_count: Option<u32>,
    /// Output file (tab-separated, appended)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl SweepArgs {
    /// Folds command-line overrides into the loaded configuration.
    fn apply(self, config: &mut AppConfig) -> Result<()> {
        if let Some(port) = self.port {
            config.serial.port = Some(port);
        }
        if let Some(path) = self.output {
            config.storage.path = path;
        }
        let sweep = &mut config.sweep;
        let start = self.start.unwrap_or(sweep.start);
        let end = self.end.unwrap_or(sweep.end);
        sweep.set_range(start, end)?;
        if let Some(step) = self.step {
            sweep.set_step(step)?;
        }
        if let Some(mode) = self.save_mode {
            sweep.set_save_mode(mode.parse::<SaveMode>()?);
        }
        if let Some(mode) = self.wire_mode {
            sweep.set_wire_mode(mode.parse::<WireMode>()?);
        }
        if let Some(limit) = self.voltage_limit {
            sweep.set_voltage_limit(limit)?;
        }
        if let Some(limit) = self.current_limit {
            sweep.set_current_limit(limit)?;
        }
        if let Some(count) = self.average_count {
            sweep.set_average_count(count.try_into()?);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ports => {
            if cli.mock {
                list_ports(&MockConnector::new(MockInstrument::new())).await
            } else {
                list_ports(&serial_connector(&config)?).await
            }
        }
        Commands::Sweep(args) => {
            args.apply(&mut config)?;
            if cli.mock {
                let connector = MockConnector::new(MockInstrument::new());
                run_sweep(connector, SettleTiming::NONE, config).await
            } else {
                let connector = serial_connector(&config)?;
                run_sweep(connector, SettleTiming::INSTRUMENT, config).await
            }
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn serial_connector(config: &AppConfig) -> Result<smu_sweep::instrument::SerialConnector> {
    Ok(smu_sweep::instrument::SerialConnector::new(config.serial.baud_rate)
        .with_read_timeout(config.serial.read_timeout()))
}

#[cfg(not(feature = "instrument_serial"))]
fn serial_connector(_config: &AppConfig) -> Result<MockConnector> {
    Err(smu_sweep::error::SmuError::SerialFeatureDisabled.into())
}

async fn list_ports<C: Connector>(connector: &C) -> Result<()> {
    let ports = connector.available_ports().await?;
    if ports.is_empty() {
        println!("No serial devices found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

async fn run_sweep<C: Connector>(connector: C, timing: SettleTiming, config: AppConfig) -> Result<()> {
    let desired = config.sweep.clone();
    let controller = RunController::new(connector, Box::new(TsvStore::new(&config.storage.path)))
        .with_config(config.sweep.clone())
        .with_timing(timing)
        .with_telemetry_capacity(config.telemetry.capacity);
    let (handle, task) = ControllerHandle::spawn(controller, config.controller.command_capacity);

    let report = handle.init(config.serial.port_selector()).await?;
    println!("{}", serde_json::to_string(&report)?);

    // init() reset the instrument; push the requested instrument settings
    handle.set_wire_mode(desired.wire_mode).await?;
    handle.set_voltage_limit(desired.voltage_limit).await?;
    handle.set_current_limit(desired.current_limit).await?;
    handle.set_average_count(desired.average_count.get()).await?;

    let mut events = handle.subscribe().await?;
    let ack = handle.start().await?;
    println!("{}", serde_json::to_string(&ack)?);

    let outcome = watch_run(&handle, &mut events).await;

    handle.shutdown().await?;
    task.await.context("Controller task panicked")?;
    info!(output = %config.storage.path.display(), "Done");
    outcome
}

/// Prints telemetry until the terminal event; the first Ctrl-C requests a stop.
async fn watch_run(
    handle: &ControllerHandle,
    events: &mut tokio::sync::mpsc::Receiver<TelemetryEvent>,
) -> Result<()> {
    let mut stop_sent = false;
    loop {
        tokio::select! {
            result = signal::ctrl_c(), if !stop_sent => {
                result.context("Failed to listen for Ctrl-C")?;
                warn!("Interrupted, stopping sweep");
                handle.stop().await?;
                stop_sent = true;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(anyhow!("telemetry channel closed before the run ended"));
                };
                println!("{}", event.to_json());
                match event {
                    TelemetryEvent::Running(_) => {}
                    TelemetryEvent::Done => return Ok(()),
                    TelemetryEvent::Error { message } => {
                        return Err(anyhow!("sweep failed: {}", message));
                    }
                }
            }
        }
    }
}
