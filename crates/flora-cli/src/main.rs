//! Command-line interface for wireless soil sensors.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby sensors |
//! | `read` | Read current sensor values |
//! | `sync` | Download history into the local database, resuming interrupted transfers |
//! | `fetch` | Fetch one reading from several devices within a deadline |
//! | `readings` | List stored readings |
//! | `progress` | Show or clear saved transfer progress |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! Settings are read from `~/.config/flora/config.toml` (or platform
//! equivalent, or `--config`). A missing file means defaults.
//!
//! # Environment Variables
//!
//! - `FLORA_DEVICE`: default device (overridden by `--device`)
//! - `FLORA_CONFIG`: configuration file path
//! - `NO_COLOR`: disable colored output
//! - `RUST_LOG`: log filter

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use flora_core::{BtleplugRadio, ConnectionPool};
use flora_store::Store;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod sink;
mod style;

use cli::{Cli, Commands, ProgressAction};
use config::{Config, require_device, resolve_devices};
use format::FormatOptions;
use sink::StoreHandle;

fn open_store(config: &Config) -> Result<Store> {
    let path = config.database_path();
    Store::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

async fn start_pool(config: &Config) -> Result<Arc<ConnectionPool>> {
    let radio = BtleplugRadio::new()
        .await
        .context("No usable Bluetooth adapter")?;
    ConnectionPool::start(Arc::new(radio), config.pool_config())
        .await
        .context("Failed to start connection pool")
}

async fn run(cli: Cli, config: Config) -> Result<String> {
    let opts = FormatOptions::new(cli.no_color, cli.compact);
    let quiet = cli.quiet;

    let output = match cli.command {
        Commands::Scan { timeout, output } => {
            let store = StoreHandle::new(open_store(&config)?);
            let pool = start_pool(&config).await?;
            let result = commands::cmd_scan(
                &pool,
                &store,
                Duration::from_secs(timeout),
                output.format,
                quiet,
                &opts,
            )
            .await;
            pool.shutdown().await;
            result?
        }
        Commands::Read { device, output } => {
            let device_id = require_device(device.device, &config)?;
            let store = StoreHandle::new(open_store(&config)?);
            let pool = start_pool(&config).await?;
            let result =
                commands::cmd_read(&pool, &store, &device_id, output.format, quiet, &opts).await;
            pool.shutdown().await;
            result?
        }
        Commands::Sync {
            device,
            output,
            full,
        } => {
            let args = commands::SyncArgs {
                device_id: require_device(device.device, &config)?,
                format: output.format,
                full,
                quiet,
            };
            let store = StoreHandle::new(open_store(&config)?);
            let pool = start_pool(&config).await?;
            let result =
                commands::cmd_sync(&pool, &store, config.transfer_options(), args, &opts).await;
            pool.shutdown().await;
            result?
        }
        Commands::Fetch { devices, output } => {
            let devices = resolve_devices(devices.device, &config);
            let store = Arc::new(StoreHandle::new(open_store(&config)?));
            let pool = start_pool(&config).await?;
            let result = commands::cmd_fetch(
                pool.clone(),
                store,
                config.background_options(),
                &devices,
                output.format,
                quiet,
                &opts,
            )
            .await;
            pool.shutdown().await;
            result?
        }
        Commands::Readings {
            device,
            output,
            kind,
            limit,
        } => commands::cmd_readings(
            &open_store(&config)?,
            device.device.as_deref(),
            kind.map(Into::into),
            limit,
            output.format,
            &opts,
        )?,
        Commands::Progress { action } => match action {
            ProgressAction::Show { device, output } => commands::cmd_progress_show(
                &open_store(&config)?,
                device.device.as_deref(),
                output.format,
                &opts,
            )?,
            ProgressAction::Clear { device } => {
                let device_id = require_device(device.device, &config)?;
                commands::cmd_progress_clear(&open_store(&config)?, &device_id)?
            }
        },
        Commands::Completions { .. } => String::new(),
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions before tracing init
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "flora", &mut io::stdout());
        return Ok(());
    }

    // Logs go to stderr so command output stays pipeable
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let output = run(cli, config).await?;
    let mut stdout = io::stdout();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
