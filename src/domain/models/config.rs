use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::run::RunOutcome;

/// Main configuration structure for brainstem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Controller limits and terminal mapping
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Self-improvement policy
    #[serde(default)]
    pub learning: LearningConfig,

    /// Where durable artifacts live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Step budget per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Upper bound on fan-out concurrency
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Global fan-out deadline in seconds
    #[serde(default = "default_parallel_timeout_secs")]
    pub parallel_timeout_secs: u64,

    /// Per-task deadline in seconds when a task declares none
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Flush the audit buffer every N steps
    #[serde(default = "default_audit_flush_interval")]
    pub audit_flush_interval: u32,

    /// Outcome for terminal nodes with no explicit mapping
    #[serde(default = "default_terminal_outcome")]
    pub default_terminal_outcome: RunOutcome,

    /// Terminal node id to outcome
    #[serde(default)]
    pub terminal_outcomes: BTreeMap<String, RunOutcome>,
}

const fn default_max_steps() -> u32 {
    100
}

const fn default_max_parallel() -> usize {
    5
}

const fn default_parallel_timeout_secs() -> u64 {
    3600
}

const fn default_task_timeout_secs() -> u64 {
    60
}

const fn default_audit_flush_interval() -> u32 {
    10
}

const fn default_terminal_outcome() -> RunOutcome {
    RunOutcome::Success
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_parallel: default_max_parallel(),
            parallel_timeout_secs: default_parallel_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            audit_flush_interval: default_audit_flush_interval(),
            default_terminal_outcome: default_terminal_outcome(),
            terminal_outcomes: BTreeMap::new(),
        }
    }
}

/// How much of the learning loop runs unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Off,
    SuggestOnly,
    /// Auto-apply changes of low or medium risk.
    #[default]
    AutoSafe,
    AutoAll,
}

impl LearningMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::SuggestOnly => "suggest_only",
            Self::AutoSafe => "auto_safe",
            Self::AutoAll => "auto_all",
        }
    }
}

/// Which change categories may be applied without review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutoUpdate {
    #[serde(default = "default_true")]
    pub edge_priorities: bool,
    #[serde(default = "default_true")]
    pub edge_weights: bool,
    #[serde(default = "default_true")]
    pub relationship_weights: bool,
    #[serde(default = "default_true")]
    pub max_retries: bool,
    #[serde(default)]
    pub guards: bool,
    #[serde(default)]
    pub prompts: bool,
    #[serde(default)]
    pub add_edges: bool,
    #[serde(default)]
    pub remove_edges: bool,
    #[serde(default)]
    pub add_nodes: bool,
}

impl Default for AutoUpdate {
    fn default() -> Self {
        Self {
            edge_priorities: true,
            edge_weights: true,
            relationship_weights: true,
            max_retries: true,
            guards: false,
            prompts: false,
            add_edges: false,
            remove_edges: false,
            add_nodes: false,
        }
    }
}

/// Learning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LearningConfig {
    #[serde(default)]
    pub mode: LearningMode,

    #[serde(default)]
    pub auto_update: AutoUpdate,

    /// Analyses required before an evolution cycle runs
    #[serde(default = "default_min_runs")]
    pub min_runs: usize,

    /// Changes below this confidence are not proposed
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Success rate above which an edge gains precedence
    #[serde(default = "default_priority_success_rate")]
    pub priority_success_rate: f64,

    /// Share of runs at the retry ceiling that widens it
    #[serde(default = "default_retry_cap_ratio")]
    pub retry_cap_ratio: f64,

    /// Failures at one node before a relationship is proposed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
}

const fn default_min_runs() -> usize {
    3
}

const fn default_min_confidence() -> f64 {
    0.5
}

const fn default_priority_success_rate() -> f64 {
    0.7
}

const fn default_retry_cap_ratio() -> f64 {
    0.3
}

const fn default_failure_threshold() -> usize {
    2
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            mode: LearningMode::default(),
            auto_update: AutoUpdate::default(),
            min_runs: default_min_runs(),
            min_confidence: default_min_confidence(),
            priority_success_rate: default_priority_success_rate(),
            retry_cap_ratio: default_retry_cap_ratio(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Memory persistence backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Jsonl,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Root directory for memory, runs and evolution logs
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub memory_backend: MemoryBackend,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".brainstem")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            memory_backend: MemoryBackend::default(),
        }
    }
}

impl StorageConfig {
    pub fn memory_path(&self) -> PathBuf {
        match self.memory_backend {
            MemoryBackend::Jsonl => self.root.join("memory.jsonl"),
            MemoryBackend::Sqlite => self.root.join("memory.db"),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn evolution_dir(&self) -> PathBuf {
        self.root.join("evolution")
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_format() -> LogFormat {
    LogFormat::Pretty
}

const fn default_true() -> bool {
    true
}
