//! Record listing command.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ListArgs {
    /// Only records for this user
    #[arg(short, long)]
    user: Option<String>,

    /// Show only the most recent N records
    #[arg(short, long)]
    limit: Option<usize>,
}

/// Record as returned by the server. Unlisted fields are kept for JSON/YAML output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub user: String,
    pub kind: String,
    pub official_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_server_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<serde_json::Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl EventRecord {
    pub fn confidence(&self) -> Option<&str> {
        self.audit.as_ref()?.get("confidence")?.as_str()
    }
}

#[derive(Debug, Serialize, Tabled)]
struct RecordRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Official time")]
    official_timestamp: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

impl From<&EventRecord> for RecordRow {
    fn from(record: &EventRecord) -> Self {
        Self {
            id: record.id.clone(),
            user: record.user.clone(),
            kind: record.kind.clone(),
            official_timestamp: record.official_timestamp.clone(),
            confidence: record.confidence().unwrap_or("-").to_string(),
        }
    }
}

fn select(records: Vec<EventRecord>, user: Option<&str>, limit: Option<usize>) -> Vec<EventRecord> {
    let mut records: Vec<_> = records
        .into_iter()
        .filter(|r| user.map_or(true, |u| r.user == u))
        .collect();
    if let Some(limit) = limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    records
}

pub async fn execute(args: ListArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let records: Vec<EventRecord> = client.get("/marcacoes").await?;
    let records = select(records, args.user.as_deref(), args.limit);

    match format {
        OutputFormat::Table => {
            let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&records, format),
    }
}
