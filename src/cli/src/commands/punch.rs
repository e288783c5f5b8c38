//! Event punch command.
//!
//! Syncs with the server clock, then submits an event claiming the server
//! time at capture. The server keeps the claim when it is within tolerance.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use clap::Args;
use serde::Serialize;

use super::list::EventRecord;
use crate::client::{ApiClient, TimeSync};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct PunchArgs {
    /// User the event belongs to
    #[arg(short, long)]
    user: Option<String>,

    /// Event kind, e.g. entrada or saida
    #[arg(short, long)]
    kind: Option<String>,

    /// Group id linking related events
    #[arg(long)]
    group: Option<String>,

    /// Latitude
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Location accuracy in meters
    #[arg(long)]
    accuracy: Option<f64>,

    /// IANA time zone name
    #[arg(long)]
    time_zone: Option<String>,

    /// Local capture time (RFC 3339) for an event recorded earlier
    #[arg(long)]
    captured_at: Option<String>,

    /// Submit without a client time claim; the server stamps receipt time
    #[arg(long)]
    no_claim: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PunchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
    client_id: String,
    device_wall_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    approx_server_millis: Option<i64>,
    device_utc_offset_minutes: i32,
    network_state: &'static str,
}

fn build_request(
    args: &PunchArgs,
    captured_at: DateTime<Utc>,
    sync: Option<&TimeSync>,
    utc_offset_minutes: i32,
) -> PunchRequest {
    PunchRequest {
        user: args.user.clone(),
        kind: args.kind.clone(),
        group_id: args.group.clone(),
        lat: args.lat,
        lng: args.lng,
        accuracy_meters: args.accuracy,
        time_zone: args.time_zone.clone(),
        client_id: uuid::Uuid::new_v4().to_string(),
        device_wall_timestamp: captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        approx_server_millis: sync.map(|s| s.server_time_at(captured_at.timestamp_millis())),
        device_utc_offset_minutes: utc_offset_minutes,
        network_state: "online",
    }
}

pub async fn execute(args: PunchArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let captured_at = match &args.captured_at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --captured-at value: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let sync = if args.no_claim {
        None
    } else {
        Some(client.sync_time(3).await?)
    };

    let utc_offset_minutes = Local::now().offset().local_minus_utc() / 60;
    let request = build_request(&args, captured_at, sync.as_ref(), utc_offset_minutes);
    let record: EventRecord = client.post("/marcacoes", &request).await?;

    match format {
        OutputFormat::Table => {
            output::print_success("Event recorded");
            output::print_detail("ID", &record.id);
            output::print_detail("User", &record.user);
            output::print_detail("Kind", &record.kind);
            output::print_detail("Official time", &record.official_timestamp);
            if let Some(claim) = record.approx_server_millis {
                output::print_detail("Claimed server time", &claim.to_string());
            }
            match record.confidence() {
                Some("client_accepted") => {
                    output::print_detail("Claim", "accepted");
                }
                Some("client_rejected") => {
                    output::print_warning("Claimed time was outside tolerance; server time used")
                }
                _ => {}
            }
        }
        _ => output::print_item(&record, format)?,
    }

    Ok(())
}
