//! Health check command.
//!
//! Queries the `/health` endpoint and displays clock and store status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include clock details
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get("/health").await?;

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("Server Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }

            if let Some(store) = health.get("store").and_then(|v| v.as_str()) {
                output::print_detail("Store", store);
            }

            if args.detailed {
                if let Some(clock) = health.get("clock") {
                    output::print_header("Clock");
                    let reference = clock
                        .get("reference")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-");
                    output::print_detail("Reference", reference);
                    if let Some(age) = clock.get("reading_age_millis").and_then(|v| v.as_u64()) {
                        output::print_detail("Reading age", &format!("{} ms", age));
                    }
                    if let Some(fallbacks) = clock
                        .get("consecutive_host_fallbacks")
                        .and_then(|v| v.as_u64())
                    {
                        output::print_detail("Host fallbacks", &fallbacks.to_string());
                    }
                    if let Some(references) = clock.get("references").and_then(|v| v.as_array()) {
                        for name in references.iter().filter_map(|v| v.as_str()) {
                            output::print_detail("Configured", name);
                        }
                    }
                }
            }

            if status == "healthy" {
                output::print_success("All systems operational");
            } else {
                output::print_warning(&format!(
                    "Server status: {} (timestamps come from the host clock)",
                    status
                ));
            }
        }
        _ => output::print_item(&health, format)?,
    }

    Ok(())
}
