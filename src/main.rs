//! CLI Entry Point for mcm_daq
//!
//! Drives a Thorlabs MCM3000/MCM3001 stage controller from the command line.
//!
//! # Usage
//!
//! ```bash
//! mcm_daq stages
//! mcm_daq --port /dev/ttyUSB0 position --channel 0
//! mcm_daq --port COM4 move --channel 0 --um 1000
//! mcm_daq --port COM4 move --channel 0 --um -250 --absolute --no-block
//! mcm_daq --simulate exercise --channel 0
//! ```
//!
//! Configuration comes from `config/mcm3000.toml` (or `--config`) and
//! `MCM_DAQ_*` environment variables; command-line flags win.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use daq_driver_thorlabs::mcm3000::ChannelId;
use mcm_daq::commands;
use mcm_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use mcm_daq::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcm_daq", version)]
#[command(about = "Thorlabs MCM3000 stage controller CLI", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port path (overrides controller.port)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Use a simulated controller instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported stage models
    Stages,

    /// Read the current position
    Position {
        /// Channel (0-2)
        #[arg(long, short, default_value_t = 0)]
        channel: u8,
    },

    /// Move a channel
    Move {
        /// Channel (0-2)
        #[arg(long, short, default_value_t = 0)]
        channel: u8,

        /// Distance (relative) or position (absolute) in micrometers
        #[arg(long, allow_hyphen_values = true)]
        um: f64,

        /// Treat --um as an absolute position
        #[arg(long)]
        absolute: bool,

        /// Return before the stage settles, then finish the move explicitly
        #[arg(long)]
        no_block: bool,
    },

    /// Define the current position as encoder zero (stage must be centered)
    Zero {
        /// Channel (0-2)
        #[arg(long, short, default_value_t = 0)]
        channel: u8,
    },

    /// Run the demonstration routine on one channel
    Exercise {
        /// Channel (0-2)
        #[arg(long, short, default_value_t = 0)]
        channel: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let channel = match &cli.command {
        Commands::Stages => {
            print!("{}", commands::stage_table());
            return Ok(());
        }
        Commands::Position { channel }
        | Commands::Move { channel, .. }
        | Commands::Zero { channel }
        | Commands::Exercise { channel } => ChannelId::new(*channel)?,
    };

    let result = run(cli.command, channel, &config, cli.simulate).await;
    if let Err(e) = &result {
        if let Some(hint) = commands::recovery_hint(e) {
            eprintln!("hint: {hint}");
        }
    }
    result
}

async fn run(
    command: Commands,
    channel: ChannelId,
    config: &AppConfig,
    simulate: bool,
) -> Result<()> {
    let handle = commands::connect(
        config.controller.port.as_deref(),
        simulate,
        config.controller.stage.clone(),
    )
    .await?;

    // From here on the controller is closed on every exit path.
    let result = match command {
        Commands::Stages => Ok(()),
        Commands::Position { .. } => commands::position(&handle, channel).await.map(|_| ()),
        Commands::Move {
            um,
            absolute,
            no_block,
            ..
        } => commands::move_stage(&handle, channel, um, !absolute, !no_block)
            .await
            .map(|_| ()),
        Commands::Zero { .. } => commands::zero(&handle, channel).await,
        Commands::Exercise { .. } => {
            let mut rng = rand::thread_rng();
            commands::exercise(&handle, channel, &mut rng)
                .await
                .map(|_| ())
        }
    };

    let closed = handle.close().await;
    result?;
    closed?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = match &cli.config {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };
    let mut config = AppConfig::load_from(&path)?;

    if let Some(port) = &cli.port {
        config.controller.port = Some(port.clone());
    }
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.application.log_format = format.clone();
    }
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}
