//! Common test utilities for integration tests
//!
//! Provides the research graph fixture, file-backed stores rooted in a temp
//! directory, and scripted completion clients.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use brainstem::adapters::file::{FileRunArchive, JsonlEvolutionLog, JsonlMemoryRepository, YamlGraphRepository};
use brainstem::adapters::mock::{MockCompletionClient, MockResponse};
use brainstem::domain::models::StorageConfig;
use brainstem::{BrainController, Graph, MemoryStore};
use serde_json::json;
use tempfile::TempDir;

/// intake -> research -> remember -> verify, with one retry back to research
/// before escalating.
pub const RESEARCH_GRAPH: &str = r#"
graph:
  name: research
  version: "1.0.0"
start_node: intake
nodes:
  - id: intake
    kind:
      type: intake
    stage: intake
    instruction: "[intake] {{user_request}}"
  - id: research
    kind:
      type: reasoning
    stage: research
    instruction: "[research] {{user_request}} prior: {{dredged_memory.prior}}"
    state_writes:
      - path: findings
        from: summary
    memory:
      write: true
      dredge:
        - query: "Acme"
          limit: 3
          as_key: prior
  - id: remember
    kind:
      type: memory_write
    stage: research
  - id: verify
    kind:
      type: quality_gate
      criteria:
        - name: has_findings
          check: "len(data.findings) > 0"
    stage: verification
  - id: success
    kind:
      type: terminal
      outcome: success
    stage: complete
  - id: escalate
    kind:
      type: terminal
      outcome: escalated
    stage: escalated
edges:
  - id: e_intake
    from: intake
    to: research
    priority: 3
  - id: e_remember
    from: research
    to: remember
  - id: e_verify
    from: remember
    to: verify
  - id: e_pass
    from: verify
    to: success
    guard: "data.verification_passed == True"
    priority: 0
  - id: e_retry
    from: verify
    to: research
    kind: bounded_retry
    guard: "data.verification_passed == False"
    max_retries: 1
    priority: 1
  - id: e_escalate
    from: verify
    to: escalate
    priority: 2
"#;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

pub fn research_graph() -> Graph {
    YamlGraphRepository::parse(RESEARCH_GRAPH).expect("fixture graph parses")
}

/// Write the research graph under `root` and return its repository.
pub async fn write_research_graph(root: &Path) -> YamlGraphRepository {
    let repository = YamlGraphRepository::new(root.join("graph.yaml"));
    brainstem::GraphRepository::save(&repository, &research_graph())
        .await
        .expect("fixture graph saves");
    repository
}

/// Research step that finds something and declares one fact.
pub fn finding_completion(fact: &str) -> MockCompletionClient {
    MockCompletionClient::new().with_output(
        "[research]",
        json!({
            "summary": "Acme sells anvils",
            "facts": [{
                "text": fact,
                "triplets": [{"subject": "Acme", "predicate": "located_in", "object": fact}],
            }],
        }),
    )
}

/// Research step that never finds anything.
pub fn empty_completion() -> MockCompletionClient {
    MockCompletionClient::new().with_script("[research]", vec![MockResponse::success(json!({"summary": ""}))])
}

/// Stores rooted at one storage directory.
pub struct FileStack {
    pub storage: StorageConfig,
    pub memory: Arc<MemoryStore>,
    pub archive: Arc<FileRunArchive>,
    pub evolution_log: Arc<JsonlEvolutionLog>,
    pub graph_repository: Arc<YamlGraphRepository>,
}

impl FileStack {
    pub async fn open(root: &Path) -> Self {
        let storage = StorageConfig {
            root: root.to_path_buf(),
            ..StorageConfig::default()
        };
        let memory = MemoryStore::open(Arc::new(JsonlMemoryRepository::new(storage.memory_path())))
            .await
            .expect("memory opens");
        let graph_repository = Arc::new(write_research_graph(root).await);
        Self {
            archive: Arc::new(FileRunArchive::new(storage.runs_dir())),
            evolution_log: Arc::new(JsonlEvolutionLog::new(storage.evolution_dir())),
            memory: Arc::new(memory),
            graph_repository,
            storage,
        }
    }

    pub async fn controller(&self, completion: MockCompletionClient) -> BrainController {
        let graph = brainstem::GraphRepository::load(self.graph_repository.as_ref())
            .await
            .expect("graph loads");
        BrainController::new(graph, Arc::clone(&self.memory), Arc::new(completion))
            .with_run_archive(self.archive.clone())
            .with_graph_repository(self.graph_repository.clone())
    }
}
