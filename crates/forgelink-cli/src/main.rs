//! ForgeLink CLI - headless monitor console.
//!
//! Runs the multi-printer polling core against simulated printers and
//! relays its event stream to the terminal, enabling demos, soak testing
//! and scripted inspection without a GUI shell.

mod cli;
mod commands;
mod error;
mod simulated;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use error::exit_codes;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Monitor(args) => commands::run_monitor(args, cli.json).await,
        Commands::Status(args) => commands::run_status(args, cli.json).await,
    };

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
