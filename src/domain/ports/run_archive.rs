use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEvent, RunState};

/// Durable per-run audit trail and final state snapshot.
#[async_trait]
pub trait RunArchive: Send + Sync {
    /// Append a batch of audit events to the run's trail.
    async fn append_audit(&self, run_id: Uuid, events: &[AuditEvent]) -> DomainResult<()>;

    /// Store the complete state as it stood at run end.
    async fn save_final_state(&self, state: &RunState) -> DomainResult<()>;

    /// Read back a run's audit trail.
    async fn load_audit(&self, run_id: Uuid) -> DomainResult<Vec<AuditEvent>>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunArchive;

#[async_trait]
impl RunArchive for NullRunArchive {
    async fn append_audit(&self, _run_id: Uuid, _events: &[AuditEvent]) -> DomainResult<()> {
        Ok(())
    }

    async fn save_final_state(&self, _state: &RunState) -> DomainResult<()> {
        Ok(())
    }

    async fn load_audit(&self, _run_id: Uuid) -> DomainResult<Vec<AuditEvent>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct Archived {
    audit: HashMap<Uuid, Vec<AuditEvent>>,
    states: HashMap<Uuid, RunState>,
}

/// Volatile archive for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunArchive {
    inner: Arc<RwLock<Archived>>,
}

impl InMemoryRunArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// The final state stored for a run, if any.
    pub async fn final_state(&self, run_id: Uuid) -> Option<RunState> {
        self.inner.read().await.states.get(&run_id).cloned()
    }
}

#[async_trait]
impl RunArchive for InMemoryRunArchive {
    async fn append_audit(&self, run_id: Uuid, events: &[AuditEvent]) -> DomainResult<()> {
        self.inner
            .write()
            .await
            .audit
            .entry(run_id)
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    async fn save_final_state(&self, state: &RunState) -> DomainResult<()> {
        self.inner.write().await.states.insert(state.run_id, state.clone());
        Ok(())
    }

    async fn load_audit(&self, run_id: Uuid) -> DomainResult<Vec<AuditEvent>> {
        Ok(self.inner.read().await.audit.get(&run_id).cloned().unwrap_or_default())
    }
}
