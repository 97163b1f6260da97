use async_trait::async_trait;
use serde_json::{Map, Value};

/// Skill (tool) execution capability.
#[async_trait]
pub trait SkillExecutor: Send + Sync {
    /// Run `skill` with an instruction, the serialized run context and the
    /// node's parameters.
    ///
    /// # Errors
    /// Must report failure instead of hanging; errors become a failed node
    /// result, not a run error.
    async fn execute(
        &self,
        skill: &str,
        instruction: &str,
        context: &Value,
        params: &Map<String, Value>,
    ) -> anyhow::Result<Value>;

    /// Names offered to prompts as `available_skills`.
    fn available_skills(&self) -> Vec<String> {
        Vec::new()
    }
}
