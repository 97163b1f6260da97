//! End-to-end runs of the research graph over file-backed stores.

mod common;

use std::sync::Arc;

use brainstem::adapters::file::{JsonlMemoryRepository, YamlGraphRepository};
use brainstem::adapters::mock::MockCompletionClient;
use brainstem::domain::models::AuditAction;
use brainstem::{BrainController, DomainError, GraphRepository, MemoryQuery, MemoryStore, RunArchive, RunOutcome};
use common::{empty_completion, finding_completion, research_graph, temp_dir, FileStack};
use serde_json::json;

#[tokio::test]
async fn test_successful_run_persists_everything() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut controller = stack.controller(finding_completion("Acme is in Paris")).await;

    let result = controller.run("Where is Acme?", None).await.unwrap();

    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.final_node, "success");
    assert_eq!(
        result.final_state.trail,
        vec!["intake", "research", "remember", "verify", "success"]
    );
    assert_eq!(result.final_data["findings"], json!("Acme sells anvils"));
    assert_eq!(result.final_data["sediment_written"], json!(1));
    assert_eq!(result.final_data["verification_passed"], json!(true));

    // memory
    let stats = stack.memory.stats().await;
    assert_eq!(stats.valid_records, 1);

    // audit trail and final state
    let audit = stack.archive.load_audit(result.run_id).await.unwrap();
    let executed: Vec<&str> = audit
        .iter()
        .filter(|e| e.action == AuditAction::NodeExecuted)
        .map(|e| e.node_id.as_str())
        .collect();
    assert_eq!(executed, vec!["intake", "research", "remember", "verify", "success"]);
    let final_state = stack.archive.load_final_state(result.run_id).await.unwrap().unwrap();
    assert_eq!(final_state.current_node, "success");
    assert!(final_state.audit.is_empty());

    // graph statistics
    let graph = stack.graph_repository.load().await.unwrap();
    assert_eq!(graph.edge("e_pass").unwrap().stats.success_count, 1);
    assert_eq!(graph.edge("e_retry").unwrap().stats.total(), 0);
}

#[tokio::test]
async fn test_second_run_dredges_and_flags_conflict() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;

    let mut first = stack.controller(finding_completion("Acme is in Paris")).await;
    first.run("Where is Acme?", None).await.unwrap();

    let mut second = stack.controller(finding_completion("Acme is in Berlin")).await;
    let result = second.run("Where is Acme now?", None).await.unwrap();

    assert_eq!(result.outcome, RunOutcome::Success);
    let prior = result.final_data["dredged_memory"]["prior"].as_str().unwrap();
    assert!(prior.contains("Acme is in Paris"), "dredged: {prior}");

    let conflicts = result.final_data["sediment_conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].as_str().unwrap().contains("(Acme, located_in)"));
    assert_eq!(result.final_data["memory_conflicts"], result.final_data["sediment_conflicts"]);

    // flagged, not skipped: both versions stay valid
    assert_eq!(stack.memory.stats().await.valid_records, 2);
}

#[tokio::test]
async fn test_empty_findings_retry_then_escalate() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut controller = stack.controller(empty_completion()).await;

    let result = controller.run("Where is Acme?", None).await.unwrap();

    assert_eq!(result.outcome, RunOutcome::Escalated);
    assert_eq!(result.final_node, "escalate");
    assert_eq!(result.final_state.counters.visits("research"), 2);
    assert_eq!(result.final_state.counters.retries("e_retry"), 1);
    assert!(result
        .final_state
        .signals
        .failures
        .iter()
        .any(|f| f.node_id == "verify"));

    let graph = stack.graph_repository.load().await.unwrap();
    let retry = graph.edge("e_retry").unwrap();
    assert_eq!(retry.stats.success_count, 1);
    assert_eq!(retry.stats.failure_count, 1);
    assert_eq!(graph.edge("e_escalate").unwrap().stats.success_count, 1);
}

#[tokio::test]
async fn test_memory_survives_reopen() {
    let dir = temp_dir();
    let stack = FileStack::open(dir.path()).await;
    let mut controller = stack.controller(finding_completion("Acme is in Paris")).await;
    controller.run("Where is Acme?", None).await.unwrap();

    let reopened = MemoryStore::open(Arc::new(JsonlMemoryRepository::new(stack.storage.memory_path())))
        .await
        .unwrap();
    let result = reopened.query(&MemoryQuery::new().with_text("paris")).await;
    assert_eq!(result.total_matches, 1);
    assert_eq!(result.records[0].node_id.as_deref(), Some("remember"));
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_before_running() {
    let mut graph = research_graph();
    graph.start_node = "nowhere".to_string();
    let mut controller = BrainController::new(
        graph,
        Arc::new(MemoryStore::in_memory()),
        Arc::new(MockCompletionClient::new()),
    );

    let err = controller.run("anything", None).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidGraph(ref errors) if errors.iter().any(|e| e.contains("nowhere"))));
}

#[tokio::test]
async fn test_graph_round_trips_through_yaml() {
    let dir = temp_dir();
    let repository = YamlGraphRepository::new(dir.path().join("graph.yaml"));
    let mut graph = research_graph();
    graph.record_edge_outcome("e_intake", true);
    graph.update_relationship_weight("research", "verify", 0.25, "verify keeps rejecting thin research");

    repository.save(&graph).await.unwrap();
    assert_eq!(repository.load().await.unwrap(), graph);
}
