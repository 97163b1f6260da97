use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Graph;

/// Durable home of a brain's graph, including edge statistics and
/// relationships.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn load(&self) -> DomainResult<Graph>;

    /// Persist the whole graph as one unit.
    async fn save(&self, graph: &Graph) -> DomainResult<()>;
}
