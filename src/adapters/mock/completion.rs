//! Mock completion client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{MockResponse, Script};
use crate::domain::ports::CompletionClient;

/// Completion client answering from scripts keyed by prompt substrings.
///
/// The first script whose needle occurs in the prompt serves the call;
/// prompts matching no script get the default response. Every prompt is
/// recorded.
pub struct MockCompletionClient {
    default_response: MockResponse,
    scripts: Vec<(String, Script)>,
    served: Arc<RwLock<Vec<usize>>>,
    prompts: Arc<RwLock<Vec<String>>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::with_default_response(MockResponse::default())
    }

    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            scripts: Vec::new(),
            served: Arc::new(RwLock::new(Vec::new())),
            prompts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer prompts containing `needle` with `responses`, in order.
    pub fn with_script(mut self, needle: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        self.scripts.push((needle.into(), Script { responses }));
        self.served = Arc::new(RwLock::new(vec![0; self.scripts.len()]));
        self
    }

    /// Shorthand for a script with one successful output.
    pub fn with_output(self, needle: impl Into<String>, output: Value) -> Self {
        self.with_script(needle, vec![MockResponse::success(output)])
    }

    /// Get all prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.read().await.clone()
    }

    /// Clear recorded prompts and rewind every script.
    pub async fn clear(&self) {
        self.prompts.write().await.clear();
        self.served.write().await.iter_mut().for_each(|n| *n = 0);
    }

    async fn get_response(&self, prompt: &str) -> MockResponse {
        let Some(index) = self.scripts.iter().position(|(needle, _)| prompt.contains(needle.as_str())) else {
            return self.default_response.clone();
        };
        let mut served = self.served.write().await;
        let response = self.scripts[index].1.response(served[index]);
        served[index] += 1;
        response.unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, prompt: &str, _schema: Option<&Value>) -> anyhow::Result<Value> {
        self.prompts.write().await.push(prompt.to_string());
        self.get_response(prompt).await.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_response() {
        let client = MockCompletionClient::new();
        let output = client.complete("anything", None).await.unwrap();
        assert_eq!(output["summary"], json!("Mock step completed."));
        assert_eq!(client.prompts().await, vec!["anything".to_string()]);
    }

    #[tokio::test]
    async fn test_script_serves_in_order_then_repeats() {
        let client = MockCompletionClient::new().with_script(
            "[draft]",
            vec![
                MockResponse::success(json!({"n": 1})),
                MockResponse::success(json!({"n": 2})),
            ],
        );

        for expected in [1, 2, 2] {
            let output = client.complete("[draft] write it", None).await.unwrap();
            assert_eq!(output["n"], json!(expected));
        }
        assert_eq!(client.complete("other", None).await.unwrap()["summary"], json!("Mock step completed."));

        client.clear().await;
        assert_eq!(client.complete("[draft]", None).await.unwrap()["n"], json!(1));
    }

    #[tokio::test]
    async fn test_failure() {
        let client = MockCompletionClient::with_default_response(MockResponse::failure("model unavailable"));
        let err = client.complete("prompt", None).await.unwrap_err();
        assert_eq!(err.to_string(), "model unavailable");
    }
}
