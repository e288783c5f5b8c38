//! Durable storage for event records.
//!
//! The core only appends and lists. Records are never updated or deleted
//! here; reconciliation happens on the client from the echoed fields.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::EventRecord;

/// Append-only record store.
///
/// `append` returns only once the record is durable. A failure means the
/// record was not committed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist one record.
    async fn append(&self, record: &EventRecord) -> Result<()>;

    /// Every record, in append order.
    async fn list_all(&self) -> Result<Vec<EventRecord>>;

    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;
}
