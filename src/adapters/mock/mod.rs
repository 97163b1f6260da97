//! Scripted completion and skill adapters for tests and dry runs.

mod completion;
mod skill_executor;

pub use completion::MockCompletionClient;
pub use skill_executor::{MockSkillExecutor, SkillInvocation};

use serde_json::{json, Value};

/// Mock response configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    /// Returned output map
    pub output: Value,
    /// Whether to simulate failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: json!({"summary": "Mock step completed."}),
            fail: false,
            error_message: None,
        }
    }
}

impl MockResponse {
    pub fn success(output: Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    fn into_result(self) -> anyhow::Result<Value> {
        if self.fail {
            anyhow::bail!(self.error_message.unwrap_or_else(|| "Mock failure".to_string()));
        }
        Ok(self.output)
    }
}

/// Responses served in order; the last one repeats once the rest are used.
#[derive(Debug, Clone)]
struct Script {
    responses: Vec<MockResponse>,
}

impl Script {
    fn response(&self, served: usize) -> Option<MockResponse> {
        self.responses
            .get(served)
            .or_else(|| self.responses.last())
            .cloned()
    }
}
