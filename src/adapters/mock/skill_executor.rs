//! Mock skill executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{MockResponse, Script};
use crate::domain::ports::SkillExecutor;

/// One recorded skill call.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillInvocation {
    pub skill: String,
    pub instruction: String,
    pub params: Map<String, Value>,
}

/// Skill executor with scripted per-skill responses.
///
/// Unknown skills fail. An optional delay makes every call sleep first,
/// which lets tests exercise timeouts and concurrency.
pub struct MockSkillExecutor {
    skills: HashMap<String, Script>,
    delay: Option<Duration>,
    served: Arc<RwLock<HashMap<String, usize>>>,
    invocations: Arc<RwLock<Vec<SkillInvocation>>>,
}

impl MockSkillExecutor {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
            delay: None,
            served: Arc::new(RwLock::new(HashMap::new())),
            invocations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a skill answering with `responses`, in order.
    pub fn with_skill(mut self, name: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        self.skills.insert(name.into(), Script { responses });
        self
    }

    /// Register a skill that always succeeds with `output`.
    pub fn with_output(self, name: impl Into<String>, output: Value) -> Self {
        self.with_skill(name, vec![MockResponse::success(output)])
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all invocations so far, in call order.
    pub async fn invocations(&self) -> Vec<SkillInvocation> {
        self.invocations.read().await.clone()
    }

    async fn get_response(&self, skill: &str) -> Option<MockResponse> {
        let script = self.skills.get(skill)?;
        let mut served = self.served.write().await;
        let count = served.entry(skill.to_string()).or_insert(0);
        let response = script.response(*count);
        *count += 1;
        response
    }
}

impl Default for MockSkillExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for MockSkillExecutor {
    async fn execute(
        &self,
        skill: &str,
        instruction: &str,
        _context: &Value,
        params: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        self.invocations.write().await.push(SkillInvocation {
            skill: skill.to_string(),
            instruction: instruction.to_string(),
            params: params.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.get_response(skill).await {
            Some(response) => response.into_result(),
            None => anyhow::bail!("Unknown skill: {skill}"),
        }
    }

    fn available_skills(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_skill() {
        let skills = MockSkillExecutor::new()
            .with_skill(
                "search",
                vec![MockResponse::failure("rate limited"), MockResponse::success(json!({"hits": 2}))],
            )
            .with_output("fetch", json!({"body": "ok"}));

        let ctx = json!({});
        let err = skills.execute("search", "rust", &ctx, &Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        let output = skills.execute("search", "rust", &ctx, &Map::new()).await.unwrap();
        assert_eq!(output["hits"], json!(2));

        assert_eq!(skills.available_skills(), vec!["fetch".to_string(), "search".to_string()]);
        assert_eq!(skills.invocations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_skill_fails() {
        let skills = MockSkillExecutor::new();
        let err = skills.execute("nope", "", &json!({}), &Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("Unknown skill"));
    }
}
