//! Domain errors for the brainstem execution engine.

use thiserror::Error;
use uuid::Uuid;

/// Join validation violations into a single readable line.
fn format_violations(violations: &[String]) -> String {
    violations.join("; ")
}

/// Domain-level errors that can occur while building, running or evolving a brain.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The graph failed structural validation; the run never starts.
    #[error("Graph failed validation: {}", format_violations(.0))]
    InvalidGraph(Vec<String>),

    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("No outgoing edge accepted from node '{node_id}'")]
    NoValidEdge { node_id: String },

    #[error("Edge '{edge_id}' exhausted its retry ceiling of {ceiling}")]
    RetryExhausted { edge_id: String, ceiling: u32 },

    #[error("Step budget of {max_steps} exceeded")]
    StepBudgetExceeded { max_steps: u32 },

    #[error("Memory conflict: {0}")]
    MemoryConflict(String),

    #[error("Failed to evaluate '{expression}': {message}")]
    GuardEvaluation { expression: String, message: String },

    #[error("Stop rule '{rule}' triggered: {reason}")]
    StopRuleTriggered { rule: String, reason: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(Uuid),

    #[error("Memory record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Persistence(err.to_string())
    }
}
