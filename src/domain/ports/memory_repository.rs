use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::MemoryRecord;

/// Durable, append-only storage for memory records.
///
/// Records are only ever appended; the single in-place update allowed is
/// closing a record's validity window.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Every record ever written, in write order.
    async fn load_all(&self) -> DomainResult<Vec<MemoryRecord>>;

    /// Append one record.
    async fn append(&self, record: &MemoryRecord) -> DomainResult<()>;

    /// Set `valid_to` on an existing record.
    ///
    /// # Errors
    /// Returns [`DomainError::RecordNotFound`] if no record has that id.
    async fn close_validity(&self, record_id: Uuid, valid_to: DateTime<Utc>) -> DomainResult<()>;
}

/// Volatile repository for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemoryRepository {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn load_all(&self) -> DomainResult<Vec<MemoryRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn append(&self, record: &MemoryRecord) -> DomainResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn close_validity(&self, record_id: Uuid, valid_to: DateTime<Utc>) -> DomainResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or(DomainError::RecordNotFound(record_id))?;
        record.valid_to = Some(valid_to);
        Ok(())
    }
}
