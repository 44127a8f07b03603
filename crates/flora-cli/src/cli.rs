//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use flora_store::ReadingKind;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reading origin filter for the `readings` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindFilter {
    Live,
    History,
}

impl From<KindFilter> for ReadingKind {
    fn from(kind: KindFilter) -> Self {
        match kind {
            KindFilter::Live => ReadingKind::Live,
            KindFilter::History => ReadingKind::History,
        }
    }
}

/// Reusable single-device arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device identifier (address, UUID or name), or use FLORA_DEVICE env var
    #[arg(short, long, env = "FLORA_DEVICE")]
    pub device: Option<String>,
}

/// Device arguments that support multiple devices
#[derive(Debug, Clone, Args)]
pub struct MultiDeviceArgs {
    /// Device identifier(s) - can be specified multiple times, or comma-separated
    #[arg(short, long, value_delimiter = ',', env = "FLORA_DEVICE")]
    pub device: Vec<String>,
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "flora")]
#[command(author, version, about = "CLI for wireless soil sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "FLORA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby sensors
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Read current sensor values from a device
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Download the device history into the local database
    Sync {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Discard saved progress and download from the first entry
        #[arg(long)]
        full: bool,
    },

    /// Fetch one reading from each device within a fixed deadline
    Fetch {
        #[command(flatten)]
        devices: MultiDeviceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show readings stored in the local database
    Readings {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Only live or only history readings
        #[arg(short, long, value_enum)]
        kind: Option<KindFilter>,

        /// Maximum number of readings
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },

    /// Inspect or discard saved history transfer progress
    Progress {
        #[command(subcommand)]
        action: ProgressAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProgressAction {
    /// Show saved progress for one or every device
    Show {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Discard saved progress so the next sync starts from the first entry
    Clear {
        #[command(flatten)]
        device: DeviceArgs,
    },
}
