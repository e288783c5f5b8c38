use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::RecordStore;
use crate::error::{ErrorCode, ErrorContext, PontoError, Result};
use crate::record::EventRecord;

/// On-disk layout: `{ "marcacoes": [ ... ] }`.
///
/// Unknown top-level keys are carried through rewrites.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    marcacoes: Vec<EventRecord>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Records kept in a single pretty-printed JSON file.
///
/// Appends are serialized by an async mutex and land through a temporary
/// file renamed over the target, so readers see either the old or the new
/// file. The temporary file and the directory are synced before `append`
/// returns, so an acknowledged record survives a crash. A missing file reads as empty. A file that does not parse is
/// reported as corrupted and left untouched.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(e).with_error_code(ErrorCode::StorageReadFailed),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::default());
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            PontoError::with_internal(
                ErrorCode::StorageCorrupted,
                "The record store is corrupted",
                format!("{}: {}", self.path.display(), e),
            )
            .with_source(e)
        })
    }

    async fn write_document(&self, document: &Document) -> Result<()> {
        let contents = serde_json::to_vec_pretty(document)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records".to_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp_path = dir.join(format!(".{}.tmp.{}", file_name, uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&tmp_path, &contents).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PontoError::storage_write(format!(
                "failed to write {}: {}",
                tmp_path.display(),
                e
            ))
            .with_source(e));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PontoError::storage_write(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            ))
            .with_source(e));
        }

        // The rename itself is only durable once the directory entry is.
        sync_dir(&dir).await.map_err(|e| {
            PontoError::storage_write(format!("failed to sync {}: {}", dir.display(), e))
                .with_source(e)
        })
    }
}

/// Create `path`, write `contents` and flush them to stable storage.
async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

// Directories cannot be opened for syncing here; the rename is as durable
// as the platform makes it.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document().await?;
        document.marcacoes.push(record.clone());
        self.write_document(&document).await?;

        tracing::debug!(
            path = %self.path.display(),
            records = document.marcacoes.len(),
            "Record appended"
        );
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EventRecord>> {
        Ok(self.read_document().await?.marcacoes)
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}
