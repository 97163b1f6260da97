//! Per-run directories holding the audit trail and the final state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{append_lines, read_lines, write_atomic};
use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEvent, RunState};
use crate::domain::ports::RunArchive;

const AUDIT_FILE: &str = "audit.jsonl";
const FINAL_STATE_FILE: &str = "final_state.json";

/// Writes `runs/<run_id>/audit.jsonl` and `runs/<run_id>/final_state.json`.
#[derive(Debug, Clone)]
pub struct FileRunArchive {
    runs_dir: PathBuf,
}

impl FileRunArchive {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self { runs_dir: runs_dir.into() }
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string())
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Ids of every archived run, sorted.
    pub async fn run_ids(&self) -> DomainResult<Vec<Uuid>> {
        let mut entries = match tokio::fs::read_dir(&self.runs_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry.file_name().to_str().and_then(|name| Uuid::parse_str(name).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read back a run's final state, if it was saved.
    pub async fn load_final_state(&self, run_id: Uuid) -> DomainResult<Option<RunState>> {
        let path = self.run_dir(run_id).join(FINAL_STATE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RunArchive for FileRunArchive {
    async fn append_audit(&self, run_id: Uuid, events: &[AuditEvent]) -> DomainResult<()> {
        append_lines(&self.run_dir(run_id).join(AUDIT_FILE), events).await?;
        debug!(%run_id, events = events.len(), "audit flushed");
        Ok(())
    }

    async fn save_final_state(&self, state: &RunState) -> DomainResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.run_dir(state.run_id).join(FINAL_STATE_FILE), &json).await
    }

    async fn load_audit(&self, run_id: Uuid) -> DomainResult<Vec<AuditEvent>> {
        read_lines(&self.run_dir(run_id).join(AUDIT_FILE)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AuditAction;
    use serde_json::json;

    #[tokio::test]
    async fn test_audit_batches_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileRunArchive::new(dir.path().join("runs"));
        let mut state = RunState::new("brain", "req", "start");

        state.record_audit("start", AuditAction::NodeExecuted, json!({"step": 1}));
        archive.append_audit(state.run_id, &state.drain_audit()).await.unwrap();
        state.record_audit("next", AuditAction::NoValidEdge, json!({}));
        archive.append_audit(state.run_id, &state.drain_audit()).await.unwrap();

        let audit = archive.load_audit(state.run_id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].node_id, "start");
        assert_eq!(audit[1].action, AuditAction::NoValidEdge);
    }

    #[tokio::test]
    async fn test_final_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileRunArchive::new(dir.path());
        let mut state = RunState::new("brain", "req", "start");
        state.set("answer.value", json!(42));

        assert!(archive.load_final_state(state.run_id).await.unwrap().is_none());
        archive.save_final_state(&state).await.unwrap();

        let restored = archive.load_final_state(state.run_id).await.unwrap().unwrap();
        assert_eq!(restored.get("answer.value"), Some(&json!(42)));
        assert_eq!(restored.run_id, state.run_id);
    }
}
