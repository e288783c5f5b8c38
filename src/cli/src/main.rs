//! Ponto CLI - Command-line client for a Ponto time-clock server.
//!
//! Provides commands for time sync, event punching, listing, and health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{health, list, punch, time};
use output::OutputFormat;

/// Ponto - server-authoritative time clock CLI
#[derive(Parser)]
#[command(
    name = "ponto",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Ponto - server-authoritative time clock",
    long_about = "CLI for syncing with a Ponto server's authoritative clock and recording clock-in/out events.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "PONTO_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server time and this machine's offset from it
    Time(time::TimeArgs),

    /// Record a clock-in/out event
    Punch(punch::PunchArgs),

    /// List recorded events
    List(list::ListArgs),

    /// Check server health
    Health(health::HealthArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let client = client::ApiClient::new(&cli.api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Time(args) => time::execute(args, &client, format).await,
        Commands::Punch(args) => punch::execute(args, &client, format).await,
        Commands::List(args) => list::execute(args, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
