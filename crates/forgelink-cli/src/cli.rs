//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};

/// ForgeLink CLI - headless console for the multi-printer monitor core
#[derive(Parser, Debug)]
#[command(name = "forgelink-cli")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitor over simulated printers and stream its events
    Monitor(MonitorArgs),

    /// Run briefly and print a coordinator diagnostics table
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Number of simulated printers to register
    #[arg(short, long, default_value = "3")]
    pub printers: usize,

    /// Polling interval for the foregrounded printer (ms)
    #[arg(long, default_value = "3000", env = "FORGELINK_ACTIVE_INTERVAL")]
    pub active_interval: u64,

    /// Polling interval for background printers (ms)
    #[arg(long, default_value = "3000", env = "FORGELINK_INACTIVE_INTERVAL")]
    pub inactive_interval: u64,

    /// Delay before a retry after a failed poll (ms)
    #[arg(long, default_value = "2000")]
    pub retry_delay: u64,

    /// Consecutive failures tolerated before an error is surfaced
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Rotate the active printer every N seconds to exercise cadence retuning
    #[arg(long)]
    pub switch_every: Option<u64>,

    /// Probability (0.0-1.0) that a simulated poll fails
    #[arg(long, default_value = "0.0")]
    pub failure_rate: f64,

    /// Discord-compatible webhook URL for print notifications
    #[arg(long, env = "FORGELINK_WEBHOOK")]
    pub webhook: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of simulated printers to register
    #[arg(short, long, default_value = "3")]
    pub printers: usize,

    /// Seconds to let polling settle before sampling diagnostics
    #[arg(long, default_value = "2")]
    pub settle: u64,
}
