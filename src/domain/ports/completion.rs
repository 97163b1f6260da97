use async_trait::async_trait;
use serde_json::Value;

/// Language-model completion capability.
///
/// Implementations may be non-deterministic. The controller only inspects
/// the declared keys of the returned map (`state_patch`, `facts`,
/// `parallel_tasks`, `confidence`, `summary`).
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a rendered prompt, optionally constrained by a JSON schema.
    ///
    /// # Errors
    /// Returns an error when the call fails; the run then ends with `ERROR`.
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> anyhow::Result<Value>;
}
