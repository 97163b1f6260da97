//! Evolution engine: the approval workflow around the learning engine.
//!
//! Collects run analyses, runs evolution cycles (proposal generation plus
//! auto-apply of safe changes), and applies or rejects pending proposals.
//! Every proposal snapshot, applied change and cycle goes to the evolution
//! log; the graph is saved whenever a change lands.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Change, EdgeSummary, EvolutionCycle, EvolutionStats, Graph, LearningConfig, LearningMode, Proposal,
    ProposalStatus, RunAnalysis, RunOutcome, RunResult, Suggestion, SuggestionPriority,
};
use crate::domain::ports::{EvolutionLog, GraphRepository};
use crate::services::learning_engine::LearningEngine;
use crate::services::memory_store::MemoryStore;

const LESSON_SOURCE: &str = "evolution_engine";

/// What one evolution cycle or approval did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub proposals: Vec<Proposal>,
    pub applied: Vec<Change>,
    pub errors: Vec<String>,
}

impl EvolutionReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            errors: vec![reason.into()],
            ..Self::default()
        }
    }
}

/// Evolves one brain's graph over time.
pub struct EvolutionEngine {
    graph: Graph,
    memory: Arc<MemoryStore>,
    log: Arc<dyn EvolutionLog>,
    graph_repository: Option<Arc<dyn GraphRepository>>,
    learning: LearningEngine,
    analyses: Vec<RunAnalysis>,
}

impl EvolutionEngine {
    pub fn new(graph: Graph, memory: Arc<MemoryStore>, log: Arc<dyn EvolutionLog>, config: LearningConfig) -> Self {
        Self {
            graph,
            memory,
            log,
            graph_repository: None,
            learning: LearningEngine::new(config),
            analyses: Vec::new(),
        }
    }

    pub fn with_graph_repository(mut self, repository: Arc<dyn GraphRepository>) -> Self {
        self.graph_repository = Some(repository);
        self
    }

    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn analyses(&self) -> &[RunAnalysis] {
        &self.analyses
    }

    pub fn reset_analyses(&mut self) {
        self.analyses.clear();
    }

    /// Analyze a finished run and remember a lesson from it.
    ///
    /// # Errors
    /// Fails only when the lesson cannot be persisted.
    pub async fn record_run(&mut self, result: &RunResult) -> DomainResult<RunAnalysis> {
        let analysis = self.learning.analyze_run(result, &self.graph);

        if let Some((lesson, confidence)) = LearningEngine::lesson_for(&analysis) {
            self.memory
                .write_lesson(lesson, Some(result.run_id), LESSON_SOURCE, confidence, &[])
                .await?;
        }

        info!(
            run_id = %result.run_id,
            outcome = %result.outcome,
            bottlenecks = analysis.bottleneck_nodes.len(),
            analyses = self.analyses.len() + 1,
            "run recorded for evolution"
        );
        self.analyses.push(analysis.clone());
        Ok(analysis)
    }

    /// Run one evolution cycle over the collected analyses.
    ///
    /// Skipped (with the reason in `errors`) while learning is off or fewer
    /// than `min_runs` analyses exist. Otherwise proposals are generated,
    /// safe changes auto-applied, and everything logged.
    ///
    /// # Errors
    /// Fails when the evolution log or graph cannot be written.
    pub async fn evolve(&mut self) -> DomainResult<EvolutionReport> {
        let config = self.learning.config();
        if config.mode == LearningMode::Off {
            return Ok(EvolutionReport::skipped("Learning is off"));
        }
        if self.analyses.len() < config.min_runs {
            return Ok(EvolutionReport::skipped(format!(
                "Need at least {} runs, have {}",
                config.min_runs,
                self.analyses.len()
            )));
        }

        let mut proposals = self.learning.generate_proposals(&self.analyses, &self.graph);
        let (applied, errors) = self.learning.auto_apply_safe_changes(&mut self.graph, &mut proposals);

        for proposal in &mut proposals {
            if proposal.is_fully_applied() {
                proposal.status = ProposalStatus::Applied;
            }
            self.log.record_proposal(proposal).await?;
        }
        for change in &applied {
            self.log.record_applied(change).await?;
        }
        if !applied.is_empty() {
            self.save_graph().await?;
        }

        self.log
            .record_cycle(&EvolutionCycle {
                timestamp: Utc::now(),
                proposals: proposals.len(),
                applied: applied.len(),
                proposal_ids: proposals.iter().map(|p| p.proposal_id).collect(),
            })
            .await?;

        for error in &errors {
            warn!(error = %error, "change could not be applied");
        }
        info!(proposals = proposals.len(), applied = applied.len(), "evolution cycle complete");
        Ok(EvolutionReport {
            proposals,
            applied,
            errors,
        })
    }

    /// Proposals awaiting review.
    pub async fn pending_proposals(&self) -> DomainResult<Vec<Proposal>> {
        Ok(self
            .log
            .proposals()
            .await?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .collect())
    }

    /// Approve a pending proposal and apply its remaining changes.
    ///
    /// # Errors
    /// [`DomainError::ProposalNotFound`] for unknown ids and
    /// [`DomainError::InvalidStateTransition`] for proposals already decided.
    pub async fn approve_proposal(&mut self, proposal_id: Uuid) -> DomainResult<EvolutionReport> {
        let mut proposal = self.pending(proposal_id, "approved").await?;
        proposal.status = ProposalStatus::Approved;

        let (applied, errors) = self.learning.apply_proposal(&mut self.graph, &mut proposal);
        if proposal.is_fully_applied() {
            proposal.status = ProposalStatus::Applied;
        }

        self.log.record_proposal(&proposal).await?;
        for change in &applied {
            self.log.record_applied(change).await?;
        }
        if !applied.is_empty() {
            self.save_graph().await?;
        }

        info!(%proposal_id, applied = applied.len(), errors = errors.len(), "proposal approved");
        Ok(EvolutionReport {
            proposals: vec![proposal],
            applied,
            errors,
        })
    }

    /// Reject a pending proposal; none of its changes are applied.
    ///
    /// # Errors
    /// Same as [`EvolutionEngine::approve_proposal`].
    pub async fn reject_proposal(&mut self, proposal_id: Uuid, reason: &str) -> DomainResult<Proposal> {
        let mut proposal = self.pending(proposal_id, "rejected").await?;
        proposal.status = ProposalStatus::Rejected;
        self.log.record_proposal(&proposal).await?;
        info!(%proposal_id, reason, "proposal rejected");
        Ok(proposal)
    }

    async fn pending(&self, proposal_id: Uuid, to: &str) -> DomainResult<Proposal> {
        let proposal = self
            .log
            .proposals()
            .await?
            .into_iter()
            .find(|p| p.proposal_id == proposal_id)
            .ok_or(DomainError::ProposalNotFound(proposal_id))?;
        if proposal.status != ProposalStatus::Pending {
            return Err(DomainError::InvalidStateTransition {
                from: proposal.status.as_str().to_string(),
                to: to.to_string(),
                reason: "only pending proposals can be decided".to_string(),
            });
        }
        Ok(proposal)
    }

    async fn save_graph(&self) -> DomainResult<()> {
        if let Some(repository) = &self.graph_repository {
            repository.save(&self.graph).await?;
        }
        Ok(())
    }

    /// Aggregate view over the evolution history.
    pub async fn stats(&self) -> DomainResult<EvolutionStats> {
        let cycles = self.log.cycles().await?;
        let pending = self.pending_proposals().await?.len();

        let edge_stats: BTreeMap<String, EdgeSummary> = self
            .graph
            .edges
            .iter()
            .filter(|e| e.stats.total() > 0)
            .map(|e| {
                let total = e.stats.total() as f64;
                let summary = EdgeSummary {
                    success: e.stats.success_count,
                    failure: e.stats.failure_count,
                    success_rate: e.stats.success_count as f64 / total,
                };
                (e.id.clone(), summary)
            })
            .collect();

        Ok(EvolutionStats {
            evolution_events: cycles.len(),
            total_proposals: cycles.iter().map(|c| c.proposals).sum(),
            total_applied: cycles.iter().map(|c| c.applied).sum(),
            pending_proposals: pending,
            analyses_collected: self.analyses.len(),
            edge_stats,
            memory: self.memory.stats().await,
            relationships: self.graph.relationships.len(),
        })
    }

    /// Human-facing hints drawn from the collected analyses.
    pub fn improvement_suggestions(&self) -> Vec<Suggestion> {
        if self.analyses.is_empty() {
            return vec![Suggestion {
                priority: SuggestionPriority::Info,
                suggestion: "Run the brain a few times to collect data for improvements".to_string(),
                action: "collect_runs".to_string(),
                target: None,
            }];
        }

        let runs = self.analyses.len() as f64;
        let mut suggestions = Vec::new();

        let successes = self.analyses.iter().filter(|a| a.outcome == RunOutcome::Success).count() as f64;
        let success_rate = successes / runs;
        if success_rate < 0.5 {
            suggestions.push(Suggestion {
                priority: SuggestionPriority::High,
                suggestion: format!("Low success rate ({:.0}%). Review failure patterns.", success_rate * 100.0),
                action: "analyze_failures".to_string(),
                target: None,
            });
        }

        let mut bottlenecks: BTreeMap<&str, usize> = BTreeMap::new();
        for node in self.analyses.iter().flat_map(|a| &a.bottleneck_nodes) {
            *bottlenecks.entry(node.as_str()).or_insert(0) += 1;
        }
        for (node, count) in bottlenecks {
            if count as f64 >= runs * 0.5 {
                suggestions.push(Suggestion {
                    priority: SuggestionPriority::Medium,
                    suggestion: format!(
                        "Node '{node}' is a consistent bottleneck. Consider splitting or adding parallel paths."
                    ),
                    action: "add_parallel_path".to_string(),
                    target: Some(node.to_string()),
                });
            }
        }

        let mut retried: BTreeMap<&str, u32> = BTreeMap::new();
        for (edge, retries) in self.analyses.iter().flat_map(|a| &a.retries_by_edge) {
            let max = retried.entry(edge.as_str()).or_insert(0);
            *max = (*max).max(*retries);
        }
        for (edge, _) in retried.into_iter().filter(|(_, max)| *max >= 2) {
            suggestions.push(Suggestion {
                priority: SuggestionPriority::Low,
                suggestion: format!("Edge '{edge}' frequently uses retries. Consider adjusting guard or max_retries."),
                action: "adjust_edge".to_string(),
                target: Some(edge.to_string()),
            });
        }

        let strong: Vec<&str> = self
            .graph
            .relationships
            .iter()
            .filter(|r| r.weight > 1.2)
            .take(3)
            .map(|r| r.id.as_str())
            .collect();
        if !strong.is_empty() {
            suggestions.push(Suggestion {
                priority: SuggestionPriority::Info,
                suggestion: format!("Strong correlations found: {}", strong.join(", ")),
                action: "review_relationships".to_string(),
                target: None,
            });
        }

        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Edge, EdgeKind, FactKind, Node, NodeKind, RunState, Stage};
    use crate::domain::ports::InMemoryEvolutionLog;

    fn graph() -> Graph {
        Graph::new("evolving", "a")
            .with_node(Node::new("a", NodeKind::Merge))
            .with_node(Node::new("b", NodeKind::Merge))
            .with_edge(Edge::new("e1", "a", "b", EdgeKind::Standard).with_priority(3))
            .with_terminal("b")
    }

    fn successful_run() -> RunResult {
        let mut state = RunState::new("evolving", "req", "a");
        state.visit("a", Stage::Execution);
        state.signals.record_success("a", Some("e1".to_string()));
        state.visit("b", Stage::Complete);
        RunResult::from_state(state, RunOutcome::Success, None)
    }

    fn engine(config: LearningConfig) -> (EvolutionEngine, Arc<InMemoryEvolutionLog>, Arc<MemoryStore>) {
        let log = Arc::new(InMemoryEvolutionLog::new());
        let memory = Arc::new(MemoryStore::in_memory());
        let engine = EvolutionEngine::new(graph(), memory.clone(), log.clone(), config);
        (engine, log, memory)
    }

    #[tokio::test]
    async fn test_evolve_waits_for_min_runs() {
        let (mut engine, log, _) = engine(LearningConfig::default());
        engine.record_run(&successful_run()).await.unwrap();

        let report = engine.evolve().await.unwrap();

        assert!(report.proposals.is_empty());
        assert_eq!(report.errors, vec!["Need at least 3 runs, have 1".to_string()]);
        assert!(log.cycles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evolve_auto_applies_and_logs() {
        let (mut engine, log, memory) = engine(LearningConfig::default());
        for _ in 0..3 {
            engine.record_run(&successful_run()).await.unwrap();
        }

        let report = engine.evolve().await.unwrap();

        assert_eq!(report.applied.len(), 1);
        assert_eq!(engine.graph().edge("e1").unwrap().priority, 2);
        assert_eq!(log.applied().await.unwrap().len(), 1);
        let cycles = log.cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].applied, 1);
        assert!(engine.pending_proposals().await.unwrap().is_empty());

        let lessons = memory.lessons(10).await;
        assert_eq!(lessons.len(), 3);
        assert_eq!(lessons[0].fact.kind, FactKind::Lesson);
        assert_eq!(lessons[0].fact.text, "Successful run pattern: a -> b");

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.evolution_events, 1);
        assert_eq!(stats.total_applied, 1);
        assert_eq!(stats.analyses_collected, 3);
    }

    #[tokio::test]
    async fn test_suggest_only_queues_then_approval_applies() {
        let (mut engine, _, _) = engine(LearningConfig {
            mode: LearningMode::SuggestOnly,
            ..LearningConfig::default()
        });
        for _ in 0..3 {
            engine.record_run(&successful_run()).await.unwrap();
        }

        let report = engine.evolve().await.unwrap();
        assert!(report.applied.is_empty());
        let pending = engine.pending_proposals().await.unwrap();
        assert_eq!(pending.len(), 1);

        let approved = engine.approve_proposal(pending[0].proposal_id).await.unwrap();
        assert_eq!(approved.applied.len(), 1);
        assert_eq!(approved.proposals[0].status, ProposalStatus::Applied);
        assert_eq!(engine.graph().edge("e1").unwrap().priority, 2);
        assert!(engine.pending_proposals().await.unwrap().is_empty());

        let err = engine.approve_proposal(pending[0].proposal_id).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_reject_and_unknown_proposal() {
        let (mut engine, _, _) = engine(LearningConfig {
            mode: LearningMode::SuggestOnly,
            ..LearningConfig::default()
        });
        for _ in 0..3 {
            engine.record_run(&successful_run()).await.unwrap();
        }
        engine.evolve().await.unwrap();
        let pending = engine.pending_proposals().await.unwrap();

        let rejected = engine.reject_proposal(pending[0].proposal_id, "not now").await.unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(engine.graph().edge("e1").unwrap().priority, 3);

        let err = engine.reject_proposal(Uuid::new_v4(), "").await.unwrap_err();
        assert!(matches!(err, DomainError::ProposalNotFound(_)));
    }

    #[tokio::test]
    async fn test_improvement_suggestions() {
        let (mut engine, _, _) = engine(LearningConfig::default());
        assert_eq!(engine.improvement_suggestions()[0].action, "collect_runs");

        let failed = RunResult::from_state(RunState::new("evolving", "req", "a"), RunOutcome::Failure, None);
        engine.record_run(&failed).await.unwrap();
        let suggestions = engine.improvement_suggestions();
        assert_eq!(suggestions[0].priority, SuggestionPriority::High);
    }
}
