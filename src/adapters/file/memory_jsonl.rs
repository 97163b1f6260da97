//! Memory records as JSON lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{append_lines, read_lines, write_atomic};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::MemoryRecord;
use crate::domain::ports::MemoryRepository;

/// One record per line. Appends go to the end of the file; closing a
/// validity window rewrites the whole file atomically.
#[derive(Debug)]
pub struct JsonlMemoryRepository {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl JsonlMemoryRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemoryRepository for JsonlMemoryRepository {
    async fn load_all(&self) -> DomainResult<Vec<MemoryRecord>> {
        let _guard = self.file_lock.lock().await;
        read_lines(&self.path).await
    }

    async fn append(&self, record: &MemoryRecord) -> DomainResult<()> {
        let _guard = self.file_lock.lock().await;
        append_lines(&self.path, std::slice::from_ref(record)).await
    }

    async fn close_validity(&self, record_id: Uuid, valid_to: DateTime<Utc>) -> DomainResult<()> {
        let _guard = self.file_lock.lock().await;
        let mut records: Vec<MemoryRecord> = read_lines(&self.path).await?;
        let record = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or(DomainError::RecordNotFound(record_id))?;
        record.valid_to = Some(valid_to);

        let mut contents = String::new();
        for record in &records {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }
        write_atomic(&self.path, contents.as_bytes()).await?;
        debug!(%record_id, records = records.len(), "memory file rewritten");
        Ok(())
    }
}
