//! Run outcomes and the values a controller hands back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::state::RunState;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    /// Halted to wait for a human.
    Escalated,
    /// The step budget ran out.
    MaxSteps,
    Error,
}

impl RunOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Escalated => "escalated",
            Self::MaxSteps => "max_steps",
            Self::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "escalated" => Some(Self::Escalated),
            "max_steps" => Some(Self::MaxSteps),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// What executing one node produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    /// Deep-merged into the working data before routing.
    #[serde(default)]
    pub state_patch: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target chosen by a decision node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_target: Option<String>,
}

impl NodeResult {
    pub fn success(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            success: true,
            output: Value::Null,
            state_patch: Map::new(),
            error: None,
            decision_target: None,
        }
    }

    pub fn failure(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(node_id)
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_patch(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_patch.insert(key.into(), value);
        self
    }

    pub fn with_decision(mut self, target: Option<String>) -> Self {
        self.decision_target = target;
        self
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub final_node: String,
    pub total_steps: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub final_data: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub deliverables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The state as it stood when the run ended.
    pub final_state: RunState,
}

impl RunResult {
    pub fn from_state(state: RunState, outcome: RunOutcome, error: Option<String>) -> Self {
        let deliverables = state
            .get("deliverables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self {
            run_id: state.run_id,
            outcome,
            final_node: state.current_node.clone(),
            total_steps: state.counters.total_steps,
            started_at: state.started_at,
            ended_at: Utc::now(),
            final_data: state.data.clone(),
            deliverables,
            error,
            final_state: state,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
