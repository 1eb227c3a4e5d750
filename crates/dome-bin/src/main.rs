//! `domectl`: command-line control of a serial observatory dome.
//!
//! Loads configuration (file, then `DOME_*` environment, then flags),
//! installs logging, and runs one operation against the controller.
//!
//! # Usage
//!
//! ```bash
//! domectl status                      # connect, report state and azimuth
//! domectl --port /dev/ttyUSB0 azimuth
//! domectl slew 182.5                  # sends "+MA182;"
//! domectl capabilities                # capability flags as JSON
//! domectl ports                       # serial ports on this host
//! RUST_LOG=dome_driver=debug domectl azimuth   # show every exchange
//! ```

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dome_driver::config::DEFAULT_CONFIG_PATH;
use dome_driver::{ConnectionState, DomeConfig, DomeDriver, ShutterState};
use logging::TracingConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "domectl")]
#[command(version)]
#[command(about = "Control a serial observatory dome", long_about = None)]
struct Cli {
    /// Configuration file (TOML); a missing file falls back to defaults
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding `port.name` from the configuration
    #[arg(long, value_name = "NAME")]
    port: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, value_name = "FMT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Connect and report connection state, azimuth and shutter
    Status,

    /// Print the current azimuth in degrees
    Azimuth,

    /// Start a slew to an azimuth (degrees; wrapped into [0, 360))
    Slew {
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },

    /// Print the capability flags as JSON
    Capabilities,

    /// Print driver information as JSON
    Info,

    /// List serial ports on this host
    Ports,

    /// Print the effective configuration as TOML
    Config,
}

/// Output of `domectl status`.
#[derive(Debug, Serialize)]
struct StatusReport {
    port: String,
    state: ConnectionState,
    azimuth: f64,
    slewing: bool,
    shutter: ShutterState,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    logging::init(TracingConfig::from_dome_config(&config)?)?;

    match cli.command {
        Commands::Status => {
            with_connected(&config, |driver| async move {
                let azimuth = driver
                    .query_azimuth()
                    .await
                    .context("Failed to read dome azimuth")?;
                print_json(&StatusReport {
                    port: driver.config().port.name.clone(),
                    state: driver.connection_state(),
                    azimuth,
                    slewing: driver.is_slewing(),
                    shutter: driver.shutter_status(),
                })
            })
            .await
        }
        Commands::Azimuth => {
            with_connected(&config, |driver| async move {
                let azimuth = driver
                    .query_azimuth()
                    .await
                    .context("Failed to read dome azimuth")?;
                println!("{}", azimuth);
                Ok(())
            })
            .await
        }
        Commands::Slew { degrees } => {
            with_connected(&config, |driver| async move {
                driver
                    .move_to_azimuth(degrees)
                    .await
                    .with_context(|| format!("Failed to start slew to {} degrees", degrees))?;
                tracing::info!(target_azimuth = degrees, "Slew started");
                Ok(())
            })
            .await
        }
        Commands::Capabilities => print_json(&DomeDriver::new(config).capabilities()),
        Commands::Info => print_json(&DomeDriver::new(config).device_info()),
        Commands::Ports => {
            let ports = dome_core::serial::available_ports()
                .context("Failed to enumerate serial ports")?;
            if ports.is_empty() {
                eprintln!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

/// Layer command-line overrides on top of the loaded configuration.
fn load_config(cli: &Cli) -> Result<DomeConfig> {
    let mut config = DomeConfig::load_from(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config.display()
        )
    })?;

    if let Some(port) = &cli.port {
        config.port.name = port.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Connect, run `op`, and disconnect whether or not `op` succeeded.
async fn with_connected<F, Fut>(config: &DomeConfig, op: F) -> Result<()>
where
    F: FnOnce(std::sync::Arc<DomeDriver>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let driver = std::sync::Arc::new(DomeDriver::new(config.clone()));
    driver
        .connect()
        .await
        .with_context(|| format!("Failed to connect to dome on {}", config.port.name))?;

    let result = op(driver.clone()).await;
    driver.disconnect().await;
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
