//! Evolution history as three JSONL files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{append_lines, read_lines};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Change, EvolutionCycle, Proposal};
use crate::domain::ports::evolution_log::latest_snapshots;
use crate::domain::ports::EvolutionLog;

const PROPOSALS_FILE: &str = "proposals.jsonl";
const APPLIED_FILE: &str = "applied.jsonl";
const CYCLES_FILE: &str = "evolution_log.jsonl";

/// `proposals.jsonl` (snapshots), `applied.jsonl` and `evolution_log.jsonl`
/// under one directory.
#[derive(Debug)]
pub struct JsonlEvolutionLog {
    dir: PathBuf,
    file_lock: Mutex<()>,
}

impl JsonlEvolutionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl EvolutionLog for JsonlEvolutionLog {
    async fn record_proposal(&self, proposal: &Proposal) -> DomainResult<()> {
        let _guard = self.file_lock.lock().await;
        append_lines(&self.dir.join(PROPOSALS_FILE), std::slice::from_ref(proposal)).await
    }

    async fn proposals(&self) -> DomainResult<Vec<Proposal>> {
        let _guard = self.file_lock.lock().await;
        Ok(latest_snapshots(read_lines(&self.dir.join(PROPOSALS_FILE)).await?))
    }

    async fn record_applied(&self, change: &Change) -> DomainResult<()> {
        let _guard = self.file_lock.lock().await;
        append_lines(&self.dir.join(APPLIED_FILE), std::slice::from_ref(change)).await
    }

    async fn applied(&self) -> DomainResult<Vec<Change>> {
        let _guard = self.file_lock.lock().await;
        read_lines(&self.dir.join(APPLIED_FILE)).await
    }

    async fn record_cycle(&self, cycle: &EvolutionCycle) -> DomainResult<()> {
        let _guard = self.file_lock.lock().await;
        append_lines(&self.dir.join(CYCLES_FILE), std::slice::from_ref(cycle)).await
    }

    async fn cycles(&self) -> DomainResult<Vec<EvolutionCycle>> {
        let _guard = self.file_lock.lock().await;
        read_lines(&self.dir.join(CYCLES_FILE)).await
    }
}
