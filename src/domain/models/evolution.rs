//! Self-improvement model: run analyses, proposed graph changes and the
//! evolution log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::graph::{Edge, Relationship};
use super::memory::MemoryStats;
use super::run::RunOutcome;
use super::state::{FailureSignal, ImprovementSignal};

/// How risky a change is to apply without review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Confidence of at least 0.8 is low risk, at least 0.6 medium.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::Low
        } else if confidence >= 0.6 {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One atomic graph edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    UpdateEdgePriority {
        edge_id: String,
        old: i32,
        new: i32,
    },
    UpdateEdgeWeight {
        edge_id: String,
        old: f64,
        new: f64,
    },
    UpdateMaxRetries {
        edge_id: String,
        old: Option<u32>,
        new: u32,
    },
    AddRelationship {
        relationship: Relationship,
    },
    UpdateRelationship {
        relationship_id: String,
        old_weight: f64,
        new_weight: f64,
    },
    /// A structural addition; `edge` is present when a concrete edge could
    /// be derived, otherwise only the suggestion text is.
    AddEdge {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge: Option<Edge>,
        suggestion: String,
    },
}

impl ChangeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateEdgePriority { .. } => "update_edge_priority",
            Self::UpdateEdgeWeight { .. } => "update_edge_weight",
            Self::UpdateMaxRetries { .. } => "update_max_retries",
            Self::AddRelationship { .. } => "add_relationship",
            Self::UpdateRelationship { .. } => "update_relationship",
            Self::AddEdge { .. } => "add_edge",
        }
    }

    /// Id of the graph element the change touches.
    pub fn target(&self) -> &str {
        match self {
            Self::UpdateEdgePriority { edge_id, .. }
            | Self::UpdateEdgeWeight { edge_id, .. }
            | Self::UpdateMaxRetries { edge_id, .. } => edge_id,
            Self::AddRelationship { relationship } => &relationship.id,
            Self::UpdateRelationship { relationship_id, .. } => relationship_id,
            Self::AddEdge { target, .. } => target,
        }
    }

    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::AddEdge { .. })
    }
}

/// A proposed change with its review flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub change_id: Uuid,
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub description: String,
    pub reason: String,
    pub confidence: f64,
    pub risk: RiskLevel,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default = "default_requires_approval")]
    pub requires_approval: bool,
    #[serde(default)]
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

fn default_requires_approval() -> bool {
    true
}

impl Change {
    /// Risk derives from confidence; structural changes are never below
    /// medium and always need approval.
    pub fn new(kind: ChangeKind, description: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        let mut risk = RiskLevel::from_confidence(confidence);
        if kind.is_structural() {
            risk = risk.max(RiskLevel::Medium);
        }
        let requires_approval = kind.is_structural();
        Self {
            change_id: Uuid::new_v4(),
            kind,
            description: description.into(),
            reason: reason.into(),
            confidence,
            risk,
            auto_apply: false,
            requires_approval,
            applied: false,
            applied_at: None,
        }
    }

    /// Whether auto-apply may pick this change up.
    pub const fn is_auto_applicable(&self) -> bool {
        self.auto_apply && !self.requires_approval && !self.applied
    }

    pub fn mark_applied(&mut self) {
        self.applied = true;
        self.applied_at = Some(Utc::now());
    }
}

/// Lifecycle of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl ProposalStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
        }
    }
}

/// Related changes grouped for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub based_on_runs: Vec<Uuid>,
    pub changes: Vec<Change>,
    pub summary: String,
    pub confidence: f64,
    #[serde(default)]
    pub status: ProposalStatus,
}

impl Proposal {
    pub fn new(changes: Vec<Change>, summary: impl Into<String>, confidence: f64, based_on_runs: Vec<Uuid>) -> Self {
        Self {
            proposal_id: Uuid::new_v4(),
            created_at: Utc::now(),
            based_on_runs,
            changes,
            summary: summary.into(),
            confidence,
            status: ProposalStatus::Pending,
        }
    }

    pub fn pending_changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| !c.applied)
    }

    pub fn is_fully_applied(&self) -> bool {
        self.changes.iter().all(|c| c.applied)
    }
}

/// What one finished run says about the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAnalysis {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub success: bool,
    pub total_steps: u32,
    pub duration_secs: f64,
    /// Distinct consecutive nodes, in execution order.
    pub path_taken: Vec<String>,
    pub retries_by_edge: BTreeMap<String, u32>,
    pub visits_by_node: BTreeMap<String, u32>,
    /// Edges traversed successfully at least once during the run.
    pub successful_edges: Vec<String>,
    #[serde(default)]
    pub failures: Vec<FailureSignal>,
    #[serde(default)]
    pub improvements: Vec<ImprovementSignal>,
    #[serde(default)]
    pub bottleneck_nodes: Vec<String>,
    #[serde(default)]
    pub underused_edges: Vec<String>,
    #[serde(default)]
    pub overused_edges: Vec<String>,
}

/// One evolution cycle, as logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionCycle {
    pub timestamp: DateTime<Utc>,
    pub proposals: usize,
    pub applied: usize,
    pub proposal_ids: Vec<Uuid>,
}

/// Success history of one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
}

/// Aggregate view over the evolution history of a brain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionStats {
    pub evolution_events: usize,
    pub total_proposals: usize,
    pub total_applied: usize,
    pub pending_proposals: usize,
    pub analyses_collected: usize,
    pub edge_stats: BTreeMap<String, EdgeSummary>,
    pub memory: MemoryStats,
    pub relationships: usize,
}

/// Urgency of an improvement suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
    Info,
}

/// A human-facing improvement hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub priority: SuggestionPriority,
    pub suggestion: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}
