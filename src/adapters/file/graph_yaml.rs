//! YAML graph documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::write_atomic;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Graph;
use crate::domain::ports::GraphRepository;

/// Graph stored as a single YAML file.
#[derive(Debug, Clone)]
pub struct YamlGraphRepository {
    path: PathBuf,
}

impl YamlGraphRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a graph document without touching the filesystem.
    pub fn parse(yaml: &str) -> DomainResult<Graph> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn render(graph: &Graph) -> DomainResult<String> {
        Ok(serde_yaml::to_string(graph)?)
    }
}

#[async_trait]
impl GraphRepository for YamlGraphRepository {
    async fn load(&self) -> DomainResult<Graph> {
        let yaml = fs::read_to_string(&self.path)
            .await
            .map_err(|e| DomainError::Persistence(format!("{}: {e}", self.path.display())))?;
        let graph = Self::parse(&yaml)?;
        debug!(path = %self.path.display(), graph = graph.name(), nodes = graph.nodes.len(), "graph loaded");
        Ok(graph)
    }

    async fn save(&self, graph: &Graph) -> DomainResult<()> {
        write_atomic(&self.path, Self::render(graph)?.as_bytes()).await?;
        debug!(path = %self.path.display(), graph = graph.name(), "graph saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EdgeKind, NodeKind};

    const RESEARCH: &str = r#"
graph:
  name: research
  version: "1.2.0"
start_node: intake
terminal_nodes: [success]
nodes:
  - id: intake
    kind:
      type: intake
    instruction: "Understand: {{user_request}}"
  - id: check
    kind:
      type: quality_gate
      criteria:
        - name: has_summary
          check: "len(data.summary) > 0"
  - id: success
    kind:
      type: terminal
edges:
  - id: e1
    from: intake
    to: check
  - id: e2
    from: check
    to: success
    kind: bounded_retry
    guard: "verification_passed == true"
    max_retries: 2
"#;

    #[test]
    fn test_parse_document() {
        let graph = YamlGraphRepository::parse(RESEARCH).unwrap();
        assert_eq!(graph.name(), "research");
        assert_eq!(graph.meta.version, "1.2.0");
        assert!(matches!(graph.node("check").unwrap().kind, NodeKind::QualityGate(_)));
        let edge = graph.edge("e2").unwrap();
        assert_eq!(edge.kind, EdgeKind::BoundedRetry);
        assert_eq!(edge.max_retries, Some(2));
        assert!(graph.validate().is_empty());
    }

    #[tokio::test]
    async fn test_save_keeps_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let repository = YamlGraphRepository::new(dir.path().join("graph.yaml"));

        let mut graph = YamlGraphRepository::parse(RESEARCH).unwrap();
        graph.record_edge_outcome("e1", true);
        graph.record_edge_outcome("e2", false);
        repository.save(&graph).await.unwrap();

        let reloaded = repository.load().await.unwrap();
        assert_eq!(reloaded, graph);
        assert_eq!(reloaded.edge("e1").unwrap().stats.success_count, 1);
        assert_eq!(reloaded.edge("e2").unwrap().stats.failure_count, 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let repository = YamlGraphRepository::new("/nonexistent/graph.yaml");
        assert!(matches!(repository.load().await, Err(DomainError::Persistence(_))));
    }
}
