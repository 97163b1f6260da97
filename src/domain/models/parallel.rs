//! Fan-out task model used by the parallel executor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Lifecycle of a fan-out task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How results of a fan-out are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Successful results and per-task errors, separately.
    #[default]
    CollectAll,
    /// Shallow merge of every successful map result; later tasks win.
    MergeMaps,
    /// The first successful result in submission order.
    FirstSuccess,
    /// The successful result declaring the highest `confidence`.
    BestConfidence,
}

impl MergeStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CollectAll => "collect_all",
            Self::MergeMaps => "merge_maps",
            Self::FirstSuccess => "first_success",
            Self::BestConfidence => "best_confidence",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "collect_all" | "collect" => Some(Self::CollectAll),
            "merge_maps" | "merge_dicts" => Some(Self::MergeMaps),
            "first_success" => Some(Self::FirstSuccess),
            "best_confidence" => Some(Self::BestConfidence),
            _ => None,
        }
    }
}

fn default_task_priority() -> i32 {
    1
}

fn default_blocking() -> bool {
    true
}

fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A unit of fan-out work handed to a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelTask {
    #[serde(default = "new_task_id")]
    pub task_id: String,
    pub skill: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Lower runs first.
    #[serde(default = "default_task_priority")]
    pub priority: i32,
    /// Per-task timeout in seconds; falls back to the executor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    /// Whether the caller waits for this task when not waiting for all.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParallelTask {
    pub fn new(skill: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            task_id: new_task_id(),
            skill: skill.into(),
            instruction: instruction.into(),
            context: Map::new(),
            priority: default_task_priority(),
            timeout_secs: None,
            blocking: true,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub const fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Fold a finished result back into the task record.
    pub fn apply_result(&mut self, result: &TaskResult) {
        self.status = result.status;
        self.started_at = result.started_at;
        self.completed_at = result.completed_at;
        self.result.clone_from(&result.result);
        self.error.clone_from(&result.error);
    }
}

/// Outcome of one fan-out task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl TaskResult {
    pub fn completed(task_id: impl Into<String>, result: Value, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: impl Into<String>,
        started_at: Option<DateTime<Utc>>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            started_at,
            completed_at: Some(Utc::now()),
            duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Combine task results with the given strategy.
pub fn merge_results(results: &[TaskResult], strategy: MergeStrategy) -> Value {
    match strategy {
        MergeStrategy::CollectAll => {
            let successes: Vec<Value> = results
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.result.clone().unwrap_or(Value::Null))
                .collect();
            let errors: Vec<Value> = results
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| json!({"task_id": r.task_id, "error": r.error}))
                .collect();
            json!({
                "success_count": successes.len(),
                "failure_count": errors.len(),
                "results": successes,
                "errors": errors,
            })
        }
        MergeStrategy::MergeMaps => {
            let mut merged = Map::new();
            for result in results.iter().filter(|r| r.is_success()) {
                if let Some(Value::Object(map)) = &result.result {
                    merged.extend(map.clone());
                }
            }
            Value::Object(merged)
        }
        MergeStrategy::FirstSuccess => results
            .iter()
            .find(|r| r.is_success())
            .map_or_else(
                || json!({"error": "No successful results"}),
                |r| json!({"result": r.result}),
            ),
        MergeStrategy::BestConfidence => {
            let best = results
                .iter()
                .filter(|r| r.is_success())
                .filter_map(|r| {
                    let payload = r.result.as_ref()?;
                    let confidence = payload.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
                    payload.is_object().then_some((confidence, payload))
                })
                .fold(None::<(f64, &Value)>, |best, candidate| match best {
                    Some((score, _)) if score >= candidate.0 => best,
                    _ => Some(candidate),
                });
            best.map_or_else(
                || json!({"error": "No results with confidence"}),
                |(_, payload)| json!({"result": payload}),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str, result: Value) -> TaskResult {
        TaskResult::completed(id, result, Utc::now(), Duration::from_millis(5))
    }

    fn err(id: &str) -> TaskResult {
        TaskResult::failed(id, "boom", None, Duration::ZERO)
    }

    #[test]
    fn test_collect_all_separates_errors() {
        let merged = merge_results(&[ok("a", json!(1)), err("b"), ok("c", json!(3))], MergeStrategy::CollectAll);
        assert_eq!(merged["results"], json!([1, 3]));
        assert_eq!(merged["errors"][0]["task_id"], json!("b"));
        assert_eq!(merged["success_count"], json!(2));
        assert_eq!(merged["failure_count"], json!(1));
    }

    #[test]
    fn test_merge_maps_last_write_wins() {
        let merged = merge_results(
            &[ok("a", json!({"x": 1, "y": 1})), err("b"), ok("c", json!({"y": 2}))],
            MergeStrategy::MergeMaps,
        );
        assert_eq!(merged, json!({"x": 1, "y": 2}));
    }

    #[test]
    fn test_first_success() {
        let merged = merge_results(&[err("a"), ok("b", json!("first")), ok("c", json!("second"))], MergeStrategy::FirstSuccess);
        assert_eq!(merged, json!({"result": "first"}));
        assert_eq!(
            merge_results(&[err("a")], MergeStrategy::FirstSuccess),
            json!({"error": "No successful results"})
        );
    }

    #[test]
    fn test_best_confidence_picks_highest() {
        let merged = merge_results(
            &[
                ok("a", json!({"answer": "low", "confidence": 0.4})),
                ok("b", json!({"answer": "high", "confidence": 0.9})),
                ok("c", json!({"answer": "mid", "confidence": 0.7})),
            ],
            MergeStrategy::BestConfidence,
        );
        assert_eq!(merged["result"]["answer"], json!("high"));
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let task: ParallelTask = serde_json::from_value(json!({"skill": "search"})).unwrap();
        assert_eq!(task.priority, 1);
        assert!(task.blocking);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.task_id.is_empty());
    }
}
