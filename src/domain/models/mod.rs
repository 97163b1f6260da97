pub mod config;
pub mod constraints;
pub mod document;
pub mod evolution;
pub mod graph;
pub mod memory;
pub mod parallel;
pub mod run;
pub mod state;

pub use config::{
    AutoUpdate, Config, ExecutionConfig, LearningConfig, LearningMode, LogConfig, LogFormat, MemoryBackend,
    RotationPolicy, StorageConfig,
};
pub use constraints::{Constraints, MinimumEnforcement, StopRule, ValidationRule};
pub use evolution::{
    Change, ChangeKind, EdgeSummary, EvolutionCycle, EvolutionStats, Proposal, ProposalStatus, RiskLevel,
    RunAnalysis, Suggestion, SuggestionPriority,
};
pub use graph::{
    ConflictAction, DecisionConfig, DecisionRule, DecompositionConfig, DependencyConfig, DredgeQuery, Edge,
    EdgeAction, EdgeKind, EdgeSource, EdgeStats, GateConfig, GateCriterion, Graph, GraphMeta, Guard, MemoryOps,
    Node, NodeKind, ParallelConfig, RelationType, Relationship, SkillConfig, Stage, StateWrite, TerminalAction,
    TerminalConfig,
};
pub use memory::{
    ConflictPolicy, Fact, FactKind, MemoryConflict, MemoryQuery, MemoryRecord, MemoryStats, Provenance,
    QueryResult, SourceKind, Triplet, WriteOutcome,
};
pub use parallel::{merge_results, MergeStrategy, ParallelTask, TaskResult, TaskStatus};
pub use run::{NodeResult, RunOutcome, RunResult};
pub use state::{
    AuditAction, AuditEvent, Counters, FailureSignal, LastResult, LearningSignals, ParallelState, RunState,
};
