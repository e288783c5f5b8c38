//! Time sync command.
//!
//! Queries `/time` and reports this machine's offset from the server clock.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct TimeArgs {
    /// Number of exchanges; the one with the shortest round trip wins
    #[arg(short, long, default_value = "3")]
    samples: u32,
}

pub async fn execute(args: TimeArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let sync = client.sync_time(args.samples).await?;

    match format {
        OutputFormat::Table => {
            output::print_header("Server Time");
            output::print_detail("Server", &sync.server.server_iso);
            output::print_detail(
                "Local",
                &chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            );
            output::print_detail("Offset", &format!("{:+} ms", sync.offset_ms));
            output::print_detail("Round trip", &format!("{} ms", sync.round_trip_ms));
            output::print_detail("Source", &sync.server.source);

            if sync.server.source != "reference" {
                output::print_warning("Server is on its host clock; no time reference reachable");
            }
        }
        _ => output::print_item(&sync, format)?,
    }

    Ok(())
}
