//! Runs feeding the evolution engine, from proposal to an updated graph file.

mod common;

use std::sync::Arc;

use brainstem::domain::models::{ChangeKind, LearningConfig, ProposalStatus};
use brainstem::{EvolutionEngine, EvolutionLog, GraphRepository, LearningMode, RunOutcome};
use common::{finding_completion, temp_dir, FileStack};

fn learning(mode: LearningMode) -> LearningConfig {
    LearningConfig {
        mode,
        ..LearningConfig::default()
    }
}

/// Three successful runs recorded on an engine owning the updated graph.
async fn engine_after_runs(stack: &FileStack, mode: LearningMode) -> EvolutionEngine {
    let mut controller = stack.controller(finding_completion("Acme is in Paris")).await;
    let mut results = Vec::new();
    for _ in 0..3 {
        let result = controller.run("Where is Acme?", None).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Success);
        results.push(result);
    }

    let mut engine = EvolutionEngine::new(
        controller.into_graph(),
        Arc::clone(&stack.memory),
        stack.evolution_log.clone(),
        learning(mode),
    )
    .with_graph_repository(stack.graph_repository.clone());
    for result in &results {
        engine.record_run(result).await.unwrap();
    }
    engine
}

#[tokio::test]
async fn test_suggested_priority_change_applies_on_approval() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut engine = engine_after_runs(&stack, LearningMode::SuggestOnly).await;

    let report = engine.evolve().await.unwrap();
    assert!(report.applied.is_empty());
    let proposal = report
        .proposals
        .iter()
        .find(|p| {
            p.changes
                .iter()
                .any(|c| matches!(c.kind, ChangeKind::UpdateEdgePriority { ref edge_id, new: 2, .. } if edge_id == "e_intake"))
        })
        .expect("priority proposal for e_intake");
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert!(proposal.changes.iter().all(|c| c.confidence >= 0.7));

    let pending = engine.pending_proposals().await.unwrap();
    assert!(pending.iter().any(|p| p.proposal_id == proposal.proposal_id));

    let approved = engine.approve_proposal(proposal.proposal_id).await.unwrap();
    assert_eq!(approved.proposals[0].status, ProposalStatus::Applied);
    assert_eq!(engine.graph().edge("e_intake").unwrap().priority, 2);

    let saved = stack.graph_repository.load().await.unwrap();
    assert_eq!(saved.edge("e_intake").unwrap().priority, 2);

    let applied = stack.evolution_log.applied().await.unwrap();
    assert!(applied.iter().any(|c| c.kind.target() == "e_intake"));
    assert!(engine.approve_proposal(proposal.proposal_id).await.is_err());
}

#[tokio::test]
async fn test_auto_safe_applies_without_review() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut engine = engine_after_runs(&stack, LearningMode::AutoSafe).await;

    let report = engine.evolve().await.unwrap();

    assert!(report.applied.iter().any(|c| c.kind.target() == "e_intake"));
    let saved = stack.graph_repository.load().await.unwrap();
    assert_eq!(saved.edge("e_intake").unwrap().priority, 2);

    let cycles = stack.evolution_log.cycles().await.unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].applied, report.applied.len());
    assert!(dir.path().join("evolution").join("evolution_log.jsonl").exists());
}

#[tokio::test]
async fn test_recorded_runs_leave_lessons() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let engine = engine_after_runs(&stack, LearningMode::SuggestOnly).await;

    let lessons = stack.memory.lessons(10).await;
    assert_eq!(lessons.len(), 3);
    assert!(lessons[0].fact.text.starts_with("Successful run pattern: intake -> research"));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.analyses_collected, 3);
    assert_eq!(stats.edge_stats["e_intake"].success, 3);
}

#[tokio::test]
async fn test_evolve_waits_for_enough_runs() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut engine = engine_after_runs(&stack, LearningMode::AutoSafe).await;
    engine.reset_analyses();

    let report = engine.evolve().await.unwrap();
    assert!(report.proposals.is_empty());
    assert_eq!(report.errors, vec!["Need at least 3 runs, have 0".to_string()]);
}
