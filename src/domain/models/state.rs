//! Per-run state: working data, counters, parallel bookkeeping, audit buffer
//! and learning signals.
//!
//! A [`RunState`] is owned by exactly one controller for the lifetime of a
//! run. Guards and templates never see it directly; they see the flattened
//! map produced by [`RunState::to_context`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::document::{deep_merge, get_path, set_path};
use super::graph::Stage;
use super::parallel::{ParallelTask, TaskResult, TaskStatus};

/// Step, visit and retry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_steps: u32,
    #[serde(default)]
    pub node_visits: BTreeMap<String, u32>,
    /// Retries consumed per bounded-retry edge.
    #[serde(default)]
    pub edge_retries: BTreeMap<String, u32>,
    #[serde(default)]
    pub total_retries: u32,
    #[serde(default)]
    pub memory_writes: u32,
    #[serde(default)]
    pub parallel_tasks_spawned: u32,
    #[serde(default)]
    pub parallel_tasks_completed: u32,
    #[serde(default)]
    pub skills_invoked: u32,
}

impl Counters {
    pub fn visits(&self, node_id: &str) -> u32 {
        self.node_visits.get(node_id).copied().unwrap_or(0)
    }

    pub fn retries(&self, edge_id: &str) -> u32 {
        self.edge_retries.get(edge_id).copied().unwrap_or(0)
    }
}

/// Fan-out tasks of the run, grouped by where they are in their lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelState {
    #[serde(default)]
    pub active: Vec<ParallelTask>,
    #[serde(default)]
    pub completed: Vec<ParallelTask>,
    #[serde(default)]
    pub failed: Vec<ParallelTask>,
}

impl ParallelState {
    /// Register a new task as active.
    pub fn spawn(&mut self, mut task: ParallelTask) {
        task.status = TaskStatus::Pending;
        self.active.push(task);
    }

    /// Move an active task to completed or failed according to its result.
    /// Returns false when no active task has that id.
    pub fn finish(&mut self, result: &TaskResult) -> bool {
        let Some(position) = self.active.iter().position(|t| t.task_id == result.task_id) else {
            return false;
        };
        let mut task = self.active.remove(position);
        task.apply_result(result);
        if result.is_success() {
            self.completed.push(task);
        } else {
            self.failed.push(task);
        }
        true
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}

/// Controller action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    NodeExecuted,
    Error,
    NoValidEdge,
    MinimumEnforcement,
    StopRuleTriggered,
    ValidationFailed,
    StepBudgetExceeded,
    ForcedTermination,
}

impl AuditAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeExecuted => "node_executed",
            Self::Error => "error",
            Self::NoValidEdge => "no_valid_edge",
            Self::MinimumEnforcement => "minimum_enforcement",
            Self::StopRuleTriggered => "stop_rule_triggered",
            Self::ValidationFailed => "validation_failed",
            Self::StepBudgetExceeded => "step_budget_exceeded",
            Self::ForcedTermination => "forced_termination",
        }
    }
}

/// One entry of the run audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub node_id: String,
    pub stage: Stage,
    pub action: AuditAction,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessSignal {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSignal {
    pub timestamp: DateTime<Utc>,
    pub suggestion: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSignal {
    pub timestamp: DateTime<Utc>,
    pub observation: String,
    #[serde(default)]
    pub data: Value,
}

/// Learning signals collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSignals {
    #[serde(default)]
    pub successes: Vec<SuccessSignal>,
    #[serde(default)]
    pub failures: Vec<FailureSignal>,
    #[serde(default)]
    pub improvements: Vec<ImprovementSignal>,
    #[serde(default)]
    pub observations: Vec<ObservationSignal>,
}

impl LearningSignals {
    pub fn record_success(&mut self, node_id: impl Into<String>, edge_id: Option<String>) {
        self.successes.push(SuccessSignal {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            edge_id,
        });
    }

    pub fn record_failure(&mut self, node_id: impl Into<String>, reason: impl Into<String>, details: Value) {
        self.failures.push(FailureSignal {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            reason: reason.into(),
            details,
        });
    }

    pub fn record_improvement(&mut self, suggestion: impl Into<String>, context: Value) {
        self.improvements.push(ImprovementSignal {
            timestamp: Utc::now(),
            suggestion: suggestion.into(),
            context,
        });
    }

    pub fn record_observation(&mut self, observation: impl Into<String>, data: Value) {
        self.observations.push(ObservationSignal {
            timestamp: Utc::now(),
            observation: observation.into(),
            data,
        });
    }
}

/// Outcome of the most recently executed node, exposed to guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    pub node_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The mutable context of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub brain_id: String,
    pub run_id: Uuid,
    #[serde(default)]
    pub user_request: String,
    pub current_node: String,
    pub stage: Stage,
    pub data: Value,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub parallel: ParallelState,
    #[serde(default)]
    pub signals: LearningSignals,
    /// Events not yet flushed to the run archive.
    #[serde(default)]
    pub audit: Vec<AuditEvent>,
    /// Node ids in execution order.
    #[serde(default)]
    pub trail: Vec<String>,
    #[serde(default)]
    pub last_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<LastResult>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(brain_id: impl Into<String>, user_request: impl Into<String>, start_node: impl Into<String>) -> Self {
        Self {
            brain_id: brain_id.into(),
            run_id: Uuid::new_v4(),
            user_request: user_request.into(),
            current_node: start_node.into(),
            stage: Stage::Intake,
            data: Value::Object(Map::new()),
            counters: Counters::default(),
            parallel: ParallelState::default(),
            signals: LearningSignals::default(),
            audit: Vec::new(),
            trail: Vec::new(),
            last_output: Value::Null,
            last_result: None,
            started_at: Utc::now(),
        }
    }

    pub const fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Seed the working data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.apply_patch(data);
        self
    }

    /// Value at a dot path of the working data.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.data, path)
    }

    /// Write a value at a dot path of the working data.
    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.data, path, value);
    }

    /// Deep-merge a patch into the working data.
    pub fn apply_patch(&mut self, patch: Value) {
        if patch.is_null() {
            return;
        }
        deep_merge(&mut self.data, patch);
    }

    /// Whether the completion flag is set.
    pub fn is_done(&self) -> bool {
        matches!(self.get("done"), Some(Value::Bool(true)))
    }

    /// Count one step and one visit of `node_id`.
    pub fn visit(&mut self, node_id: &str, stage: Stage) {
        self.current_node = node_id.to_string();
        self.stage = stage;
        self.counters.total_steps += 1;
        *self.counters.node_visits.entry(node_id.to_string()).or_insert(0) += 1;
        self.trail.push(node_id.to_string());
    }

    /// Consume one retry on an edge, returning the new count.
    pub fn consume_retry(&mut self, edge_id: &str) -> u32 {
        self.counters.total_retries += 1;
        let count = self.counters.edge_retries.entry(edge_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_audit(&mut self, node_id: impl Into<String>, action: AuditAction, details: Value) {
        self.audit.push(AuditEvent {
            timestamp: Utc::now(),
            run_id: self.run_id,
            node_id: node_id.into(),
            stage: self.stage,
            action,
            details,
        });
    }

    /// Take the buffered audit events, leaving the buffer empty.
    pub fn drain_audit(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.audit)
    }

    /// Flattened evaluation context for guards and templates.
    ///
    /// Top-level keys are also reachable through a `state` alias, so both
    /// `data.score` and `state.data.score` resolve.
    pub fn to_context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("brain_id".to_string(), Value::String(self.brain_id.clone()));
        context.insert("run_id".to_string(), Value::String(self.run_id.to_string()));
        context.insert("current_node".to_string(), Value::String(self.current_node.clone()));
        context.insert("stage".to_string(), Value::String(self.stage.as_str().to_string()));
        context.insert("user_request".to_string(), Value::String(self.user_request.clone()));
        context.insert("data".to_string(), self.data.clone());
        context.insert(
            "counters".to_string(),
            serde_json::to_value(&self.counters).unwrap_or(Value::Null),
        );
        context.insert("output".to_string(), self.last_output.clone());
        context.insert(
            "last_result".to_string(),
            self.last_result
                .as_ref()
                .map_or(Value::Null, |r| json!({"node_id": r.node_id, "success": r.success, "error": r.error})),
        );
        let alias = Value::Object(context.clone());
        context.insert("state".to_string(), alias);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_patch_and_paths() {
        let mut state = RunState::new("brain", "summarize", "intake");
        state.apply_patch(json!({"research": {"sources": 3}}));
        state.apply_patch(json!({"research": {"summary": "ok"}}));
        state.set("flags.ready", json!(true));

        assert_eq!(state.get("research.sources"), Some(&json!(3)));
        assert_eq!(state.get("research.summary"), Some(&json!("ok")));
        assert_eq!(state.get("flags.ready"), Some(&json!(true)));
        assert!(!state.is_done());
        state.set("done", json!(true));
        assert!(state.is_done());
    }

    #[test]
    fn test_visit_and_retry_counters() {
        let mut state = RunState::new("brain", "", "a");
        state.visit("a", Stage::Intake);
        state.visit("b", Stage::Research);
        state.visit("a", Stage::Intake);
        assert_eq!(state.counters.total_steps, 3);
        assert_eq!(state.counters.visits("a"), 2);
        assert_eq!(state.trail, vec!["a", "b", "a"]);

        assert_eq!(state.consume_retry("loop"), 1);
        assert_eq!(state.consume_retry("loop"), 2);
        assert_eq!(state.counters.retries("loop"), 2);
        assert_eq!(state.counters.total_retries, 2);
    }

    #[test]
    fn test_drain_audit_clears_buffer() {
        let mut state = RunState::new("brain", "", "a");
        state.record_audit("a", AuditAction::NodeExecuted, json!({"kind": "intake"}));
        state.record_audit("a", AuditAction::NoValidEdge, Value::Null);
        let drained = state.drain_audit();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].action, AuditAction::NoValidEdge);
        assert!(state.audit.is_empty());
    }

    #[test]
    fn test_context_has_state_alias() {
        let mut state = RunState::new("brain", "req", "a").with_data(json!({"score": 0.7}));
        state.last_output = json!({"summary": "text"});
        let context = state.to_context();
        assert_eq!(context["data"]["score"], json!(0.7));
        assert_eq!(context["state"]["data"]["score"], json!(0.7));
        assert_eq!(context["output"]["summary"], json!("text"));
        assert_eq!(context["user_request"], json!("req"));
    }

    #[test]
    fn test_parallel_bookkeeping() {
        let mut book = ParallelState::default();
        book.spawn(ParallelTask::new("search", "a").with_id("t1"));
        book.spawn(ParallelTask::new("search", "b").with_id("t2"));

        assert!(book.finish(&TaskResult::completed("t1", json!({"ok": true}), Utc::now(), Duration::ZERO)));
        assert!(book.finish(&TaskResult::failed("t2", "timeout", None, Duration::ZERO)));
        assert!(!book.finish(&TaskResult::failed("t3", "unknown", None, Duration::ZERO)));

        assert!(book.is_idle());
        assert_eq!(book.completed[0].status, TaskStatus::Completed);
        assert_eq!(book.failed[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = RunState::new("brain", "req", "a");
        state.visit("a", Stage::Intake);
        state.signals.record_failure("a", "Gate check failed", json!({"criterion": "len"}));
        let json = serde_json::to_string(&state).unwrap();
        let restored: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
