use async_trait::async_trait;
use parking_lot::RwLock;

use super::RecordStore;
use crate::error::Result;
use crate::record::EventRecord;

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<EventRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EventRecord>> {
        Ok(self.records.read().clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
