//! CLI Entry Point for balance-logger
//!
//! Provides command-line interface for:
//! - Listing serial ports that could hold a balance
//! - Probing a single balance
//! - Recording from several balances into one CSV file until Ctrl+C
//!
//! # Usage
//!
//! ```bash
//! balance-logger ports
//! balance-logger probe /dev/ttyUSB0
//! balance-logger record --device /dev/ttyUSB0=left --device /dev/ttyUSB1=right \
//!     --interval 10 --filename bench_a
//! balance-logger --simulate record --device sim0 --device sim1
//! ```

use anyhow::{bail, Context, Result};
use balance_logger::config::Settings;
use balance_logger::controller::RunController;
use balance_logger::device::Device;
use balance_logger::error::DaqError;
use balance_logger::transport::{
    BalanceBehavior, Connector, PortManager, SerialConnector, SimulatedConnector,
};
use balance_logger::{logging, OutputCommand, RunEvent, RunState};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "balance-logger")]
#[command(about = "Unattended multi-balance serial data logger", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated balances instead of serial ports
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Take one reading from a balance
    Probe {
        /// Port path or selection label
        port: String,
    },

    /// Record from the configured balances until Ctrl+C
    Record {
        /// Balance as PORT or PORT=NAME (repeatable, in column order)
        #[arg(long = "device", short = 'd')]
        devices: Vec<String>,

        /// Seconds between rows
        #[arg(long)]
        interval: Option<u64>,

        /// Output command (O8/continuous or S/stable)
        #[arg(long)]
        command: Option<OutputCommand>,

        /// Log filename without extension
        #[arg(long)]
        filename: Option<String>,

        /// Folder that receives the log file
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => list_ports(&settings, cli.simulate),
        Commands::Probe { port } => probe(settings, cli.simulate, &port).await,
        Commands::Record {
            devices,
            interval,
            command,
            filename,
            data_dir,
        } => {
            let mut settings = settings;
            if let Some(interval) = interval {
                settings.acquisition.interval_secs = interval;
            }
            if let Some(command) = command {
                settings.acquisition.command = command;
            }
            if let Some(filename) = filename {
                settings.acquisition.filename = filename;
            }
            if let Some(data_dir) = data_dir {
                settings.acquisition.data_dir = data_dir;
            }
            let devices = if devices.is_empty() {
                settings.devices()
            } else {
                devices.iter().map(|d| parse_device_arg(d)).collect()
            };
            record(settings, cli.simulate, devices).await
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

/// `PORT` or `PORT=NAME`. The port part may be a selection label.
fn parse_device_arg(arg: &str) -> Device {
    match arg.split_once('=') {
        Some((port, name)) => Device::from_selection(port, Some(name)),
        None => Device::from_selection(arg, None),
    }
}

fn build_ports(settings: &Settings, simulate: bool, identifiers: &[String]) -> PortManager {
    let connector: Arc<dyn Connector> = if simulate {
        let mut sim = SimulatedConnector::new();
        for (i, id) in identifiers.iter().enumerate() {
            sim = sim.with_balance(
                id,
                BalanceBehavior::Noisy {
                    grams: 100.0 * (i as f64 + 1.0),
                    noise: 0.01,
                },
            );
        }
        Arc::new(sim)
    } else {
        Arc::new(SerialConnector::new(settings.acquisition.baud_rate))
    };
    PortManager::new(connector)
}

fn list_ports(settings: &Settings, simulate: bool) -> Result<()> {
    let simulated: Vec<String> = if simulate {
        settings
            .devices
            .iter()
            .map(|d| d.identifier.clone())
            .collect()
    } else {
        Vec::new()
    };
    let ports = build_ports(settings, simulate, &simulated).list_ports()?;

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for (i, port) in ports.iter().enumerate() {
        println!("{:>3}. {}", i + 1, port.label());
    }
    Ok(())
}

async fn probe(settings: Settings, simulate: bool, selection: &str) -> Result<()> {
    let device = Device::from_selection(selection, None);
    let ports = build_ports(&settings, simulate, &[device.identifier.clone()]);
    let controller = RunController::new(ports, &settings);

    let reading = controller.probe(&device.identifier).await;
    println!("{}: {}", device.identifier, reading.preview());
    Ok(())
}

async fn record(settings: Settings, simulate: bool, devices: Vec<Device>) -> Result<()> {
    if devices.is_empty() {
        bail!("No balances given. Use --device PORT[=NAME] or add [[devices]] to the config file");
    }

    let identifiers: Vec<String> = devices.iter().map(|d| d.identifier.clone()).collect();
    let ports = build_ports(&settings, simulate, &identifiers);
    let mut controller = RunController::new(ports, &settings);
    let printer = tokio::spawn(print_events(controller.subscribe()));

    controller.configure(
        devices,
        settings.acquisition.interval_secs,
        settings.acquisition.command,
        &settings.acquisition.filename,
    );

    let path = loop {
        match controller.start() {
            Ok(path) => break path,
            Err(DaqError::FileExists(path)) => {
                println!("{} already exists.", path.display());
                let Some(name) = prompt_filename().await? else {
                    bail!("No new filename given, not recording");
                };
                controller.set_filename(&name)?;
            }
            Err(e) => return Err(e.into()),
        }
    };
    println!("Recording to {} (Ctrl+C to stop)", path.display());

    let mut state = controller.watch_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Could not listen for Ctrl+C");
            }
        }
        _ = state.wait_for(|s| *s == RunState::Idle) => {
            info!("Run ended on its own");
        }
    }

    controller.stop();
    let summary = controller.join().await;
    drop(controller);
    let _ = printer.await;

    match summary {
        Some(summary) => match summary.error {
            Some(reason) => bail!("Recording to {} failed: {}", summary.path.display(), reason),
            None => {
                println!("Saved {} rows to {}", summary.rows, summary.path.display());
                Ok(())
            }
        },
        None => bail!("Recording task ended abnormally"),
    }
}

async fn print_events(mut events: broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let now = chrono::Local::now().format("%H:%M:%S");
                println!("[{now}] {event}");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Status display fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Ask for a replacement filename. `None` on empty input or EOF.
async fn prompt_filename() -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        use std::io::Write;
        print!("Enter a different filename (blank to cancel): ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await??;

    let name = line.trim();
    Ok((!name.is_empty()).then(|| name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_args() {
        let d = parse_device_arg("/dev/ttyUSB0=left");
        assert_eq!(d.identifier, "/dev/ttyUSB0");
        assert_eq!(d.name, "left");

        let d = parse_device_arg("COM3");
        assert_eq!(d.identifier, "COM3");
        assert_eq!(d.name, "COM3");
    }

    #[test]
    fn cli_parses_record() {
        let cli = Cli::try_parse_from([
            "balance-logger",
            "--simulate",
            "record",
            "-d",
            "a",
            "--device",
            "b=right",
            "--interval",
            "5",
            "--command",
            "S",
        ])
        .unwrap();
        assert!(cli.simulate);
        match cli.command {
            Commands::Record {
                devices,
                interval,
                command,
                ..
            } => {
                assert_eq!(devices, vec!["a", "b=right"]);
                assert_eq!(interval, Some(5));
                assert_eq!(command, Some(OutputCommand::StableOnly));
            }
            _ => panic!("expected record"),
        }
    }
}
