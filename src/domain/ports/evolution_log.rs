use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Change, EvolutionCycle, Proposal};

/// Append-only record of proposals, applied changes and evolution cycles.
///
/// Proposals are appended as snapshots; a later snapshot with the same id
/// supersedes earlier ones when read back.
#[async_trait]
pub trait EvolutionLog: Send + Sync {
    async fn record_proposal(&self, proposal: &Proposal) -> DomainResult<()>;

    /// Latest snapshot of every proposal, in first-seen order.
    async fn proposals(&self) -> DomainResult<Vec<Proposal>>;

    async fn record_applied(&self, change: &Change) -> DomainResult<()>;

    async fn applied(&self) -> DomainResult<Vec<Change>>;

    async fn record_cycle(&self, cycle: &EvolutionCycle) -> DomainResult<()>;

    async fn cycles(&self) -> DomainResult<Vec<EvolutionCycle>>;
}

/// Keep the latest snapshot per proposal id, preserving first-seen order.
pub fn latest_snapshots(snapshots: Vec<Proposal>) -> Vec<Proposal> {
    let mut latest: Vec<Proposal> = Vec::new();
    for proposal in snapshots {
        match latest.iter_mut().find(|p| p.proposal_id == proposal.proposal_id) {
            Some(existing) => *existing = proposal,
            None => latest.push(proposal),
        }
    }
    latest
}

#[derive(Debug, Default)]
struct Entries {
    proposals: Vec<Proposal>,
    applied: Vec<Change>,
    cycles: Vec<EvolutionCycle>,
}

/// Volatile evolution log for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEvolutionLog {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryEvolutionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvolutionLog for InMemoryEvolutionLog {
    async fn record_proposal(&self, proposal: &Proposal) -> DomainResult<()> {
        self.entries.write().await.proposals.push(proposal.clone());
        Ok(())
    }

    async fn proposals(&self) -> DomainResult<Vec<Proposal>> {
        Ok(latest_snapshots(self.entries.read().await.proposals.clone()))
    }

    async fn record_applied(&self, change: &Change) -> DomainResult<()> {
        self.entries.write().await.applied.push(change.clone());
        Ok(())
    }

    async fn applied(&self) -> DomainResult<Vec<Change>> {
        Ok(self.entries.read().await.applied.clone())
    }

    async fn record_cycle(&self, cycle: &EvolutionCycle) -> DomainResult<()> {
        self.entries.write().await.cycles.push(cycle.clone());
        Ok(())
    }

    async fn cycles(&self) -> DomainResult<Vec<EvolutionCycle>> {
        Ok(self.entries.read().await.cycles.clone())
    }
}
