//! Graph domain model.
//!
//! A brain's workflow is a directed graph of typed [`Node`]s joined by guarded
//! [`Edge`]s. Edges carry learning statistics that survive across runs, and
//! the graph also holds learned [`Relationship`]s between concepts. Both are
//! the only parts of a graph that change between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parallel::MergeStrategy;
use super::run::RunOutcome;
use crate::domain::expression;

/// Workflow stage a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Research,
    Planning,
    #[default]
    Execution,
    Verification,
    Finalization,
    Complete,
    Escalated,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Verification => "verification",
            Self::Finalization => "finalization",
            Self::Complete => "complete",
            Self::Escalated => "escalated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "intake" => Some(Self::Intake),
            "research" => Some(Self::Research),
            "planning" => Some(Self::Planning),
            "execution" => Some(Self::Execution),
            "verification" => Some(Self::Verification),
            "finalization" => Some(Self::Finalization),
            "complete" => Some(Self::Complete),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// Skill invocation settings for a tool-execution node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// A named pass/fail check of a quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCriterion {
    pub name: String,
    pub check: String,
}

/// Quality gate settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub criteria: Vec<GateCriterion>,
    /// Advisory ceiling for the retry loop feeding back into this gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// One routing rule of a decision node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRule {
    /// Condition over `value`, e.g. `"> 0.8"`, `"in ['a', 'b']"` or `"default"`.
    pub condition: String,
    pub target: String,
}

/// Decision node settings: a routing table over one state variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Dot path of the variable, resolved against the evaluation context.
    pub variable: String,
    #[serde(default)]
    pub rules: Vec<DecisionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<String>,
}

/// Action executed when a terminal node is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TerminalAction {
    /// Mark the run as a learning candidate.
    TriggerLearning,
    /// Write a value into the working data.
    SetState { path: String, value: Value },
}

/// Terminal node settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Explicit outcome for runs ending here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_reach: Vec<TerminalAction>,
}

/// The eight node kinds, each with only the configuration it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Intake,
    Reasoning,
    ToolExecution(SkillConfig),
    Merge,
    MemoryWrite,
    QualityGate(GateConfig),
    Decision(DecisionConfig),
    Terminal(TerminalConfig),
}

impl NodeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Reasoning => "reasoning",
            Self::ToolExecution(_) => "tool_execution",
            Self::Merge => "merge",
            Self::MemoryWrite => "memory_write",
            Self::QualityGate(_) => "quality_gate",
            Self::Decision(_) => "decision",
            Self::Terminal(_) => "terminal",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Copies `output.<from>` into `<path>` of the working data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWrite {
    pub path: String,
    pub from: String,
}

/// What a memory-write node does with conflicting facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Record the conflicts in state and carry on.
    #[default]
    Flag,
    /// Write the new fact and close the validity of the records it contradicts.
    Overwrite,
    /// Queue the conflicts as questions for a human.
    Ask,
}

fn default_dredge_limit() -> usize {
    5
}

fn default_dredge_key() -> String {
    "memory".to_string()
}

/// A memory query run before a reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DredgeQuery {
    /// Text filter; may contain `{{path}}` placeholders.
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<String>,
    #[serde(default = "default_dredge_limit")]
    pub limit: usize,
    /// Key under `dredged_memory` that receives the summary.
    #[serde(default = "default_dredge_key")]
    pub as_key: String,
}

/// Memory configuration of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryOps {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dredge: Vec<DredgeQuery>,
    /// Surface model-declared facts as candidate memory writes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub write: bool,
    /// Working-data path a memory-write node reads facts from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Skip facts that contradict currently valid records.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enforce_conflicts: bool,
    #[serde(default)]
    pub conflict_action: ConflictAction,
}

impl MemoryOps {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// Fan-out settings for tasks declared by a reasoning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_true")]
    pub wait_for_all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            wait_for_all: true,
            timeout_secs: None,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

/// A step in the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Instruction template with `{{path}}` placeholders.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_writes: Vec<StateWrite>,
    #[serde(default, skip_serializing_if = "MemoryOps::is_empty")]
    pub memory: MemoryOps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelConfig>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stage: Stage::default(),
            description: String::new(),
            instruction: String::new(),
            output_schema: None,
            state_writes: Vec::new(),
            memory: MemoryOps::default(),
            parallel: None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_state_write(mut self, path: impl Into<String>, from: impl Into<String>) -> Self {
        self.state_writes.push(StateWrite {
            path: path.into(),
            from: from.into(),
        });
        self
    }

    pub fn with_memory(mut self, memory: MemoryOps) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = Some(parallel);
        self
    }
}

/// The six transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Standard,
    BoundedRetry,
    MemoryRetrieval,
    CrossContextRead,
    DependsOn,
    DecomposesInto,
}

impl EdgeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::BoundedRetry => "bounded_retry",
            Self::MemoryRetrieval => "memory_retrieval",
            Self::CrossContextRead => "cross_context_read",
            Self::DependsOn => "depends_on",
            Self::DecomposesInto => "decomposes_into",
        }
    }
}

/// Source of an edge: a node, or any node (`"*"` on disk).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeSource {
    Any,
    Node(String),
}

impl EdgeSource {
    pub fn matches(&self, node_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Node(id) => id == node_id,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Node(id) => Some(id),
        }
    }
}

impl From<String> for EdgeSource {
    fn from(s: String) -> Self {
        if s == "*" {
            Self::Any
        } else {
            Self::Node(s)
        }
    }
}

impl From<&str> for EdgeSource {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EdgeSource> for String {
    fn from(source: EdgeSource) -> Self {
        match source {
            EdgeSource::Any => "*".to_string(),
            EdgeSource::Node(id) => id,
        }
    }
}

impl std::fmt::Display for EdgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// Boolean expression gating an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guard(pub String);

impl Guard {
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    pub fn expression(&self) -> &str {
        &self.0
    }

    /// Evaluate against a flattened state context. Never fails: errors are
    /// logged and read as `false`.
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        expression::evaluate_condition(&self.0, context)
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self("True".to_string())
    }
}

/// Side effect executed when an edge is traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EdgeAction {
    /// Record an improvement signal asking for a failure analysis.
    AnalyzeFailure,
    /// Flag that the next attempt should change approach.
    AdjustApproach,
    /// Queue a question for a human.
    AskUser {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question: Option<String>,
    },
    /// Write a value into the working data.
    SetState { path: String, value: Value },
}

/// Prerequisites of a depends-on edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub required_nodes: Vec<String>,
    /// All prerequisites must have run (otherwise any one suffices).
    #[serde(default = "default_true")]
    pub require_all: bool,
    /// Working-data paths that must equal the given values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub required_state: Map<String, Value>,
}

fn default_max_children() -> usize {
    4
}

fn default_allowed_statuses() -> Vec<String> {
    vec!["ready".to_string(), "decomposing".to_string(), "pending".to_string()]
}

/// Readiness rules of a decomposes-into edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    pub parent_id: String,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default = "default_allowed_statuses")]
    pub allowed_statuses: Vec<String>,
}

/// Learning statistics accumulated on an edge across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeStats {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Bounds shared by edge and relationship weights.
pub const MIN_WEIGHT: f64 = 0.0;
pub const MAX_WEIGHT: f64 = 2.0;
const WEIGHT_SMOOTHING: f64 = 0.1;

impl Default for EdgeStats {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            weight: default_weight(),
        }
    }
}

impl EdgeStats {
    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.nudge(MAX_WEIGHT);
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.nudge(MIN_WEIGHT);
    }

    pub const fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn nudge(&mut self, target: f64) {
        self.weight = (self.weight + WEIGHT_SMOOTHING * (target - self.weight)).clamp(MIN_WEIGHT, MAX_WEIGHT);
    }
}

fn default_priority() -> i32 {
    1
}

/// A guarded, directed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: EdgeSource,
    pub to: String,
    #[serde(default)]
    pub kind: EdgeKind,
    #[serde(default)]
    pub guard: Guard,
    /// Lower sorts first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<DecompositionConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_traverse: Vec<EdgeAction>,
    #[serde(default, rename = "learning")]
    pub stats: EdgeStats,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<EdgeSource>,
        to: impl Into<String>,
        kind: EdgeKind,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind,
            guard: Guard::default(),
            priority: default_priority(),
            max_retries: None,
            dependency: None,
            decomposition: None,
            on_traverse: Vec::new(),
            stats: EdgeStats::default(),
        }
    }

    pub fn with_guard(mut self, expression: impl Into<String>) -> Self {
        self.guard = Guard::new(expression);
        self
    }

    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_dependency(mut self, dependency: DependencyConfig) -> Self {
        self.dependency = Some(dependency);
        self
    }

    pub fn with_decomposition(mut self, decomposition: DecompositionConfig) -> Self {
        self.decomposition = Some(decomposition);
        self
    }

    pub fn with_action(mut self, action: EdgeAction) -> Self {
        self.on_traverse.push(action);
        self
    }
}

/// Type tag of a learned relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Informs,
    Grounds,
    Enables,
    Blocks,
    Correlates,
    Indicates,
}

impl RelationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Informs => "informs",
            Self::Grounds => "grounds",
            Self::Enables => "enables",
            Self::Blocks => "blocks",
            Self::Correlates => "correlates",
            Self::Indicates => "indicates",
        }
    }
}

/// A learned association between two concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: RelationType,
    pub weight: f64,
    #[serde(default)]
    pub observations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: RelationType,
        weight: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind,
            weight: weight.clamp(MIN_WEIGHT, MAX_WEIGHT),
            observations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Shift the weight, clamped to [0, 2], and keep the observation.
    pub fn update_weight(&mut self, delta: f64, observation: impl Into<String>) {
        self.weight = (self.weight + delta).clamp(MIN_WEIGHT, MAX_WEIGHT);
        self.observations.push(observation.into());
        self.updated_at = Utc::now();
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Name and version header of a graph document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMeta {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

/// The execution graph of a brain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(rename = "graph")]
    pub meta: GraphMeta,
    pub start_node: String,
    #[serde(default)]
    pub terminal_nodes: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Graph {
    pub fn new(name: impl Into<String>, start_node: impl Into<String>) -> Self {
        Self {
            meta: GraphMeta {
                name: name.into(),
                version: default_version(),
            },
            start_node: start_node.into(),
            terminal_nodes: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Add a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Add an edge, replacing any edge with the same id.
    pub fn add_edge(&mut self, edge: Edge) {
        match self.edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
    }

    pub fn add_terminal(&mut self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        if !self.terminal_nodes.contains(&node_id) {
            self.terminal_nodes.push(node_id);
        }
    }

    /// Builder form of [`Graph::add_node`].
    pub fn with_node(mut self, node: Node) -> Self {
        self.add_node(node);
        self
    }

    /// Builder form of [`Graph::add_edge`].
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.add_edge(edge);
        self
    }

    /// Builder form of [`Graph::add_terminal`].
    pub fn with_terminal(mut self, node_id: impl Into<String>) -> Self {
        self.add_terminal(node_id);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    /// Whether a node is a declared terminal or has the terminal kind.
    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminal_nodes.iter().any(|t| t == id)
            || self.node(id).is_some_and(|n| n.kind.is_terminal())
    }

    /// Edges leaving `node_id` (including wildcard edges), ascending by
    /// priority; equal priorities keep declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.from.matches(node_id)).collect();
        edges.sort_by_key(|e| e.priority);
        edges
    }

    /// Edges pointing at `node_id`.
    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    /// Check structural invariants, returning every violation found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.has_node(&self.start_node) {
            errors.push(format!("Start node '{}' not found in nodes", self.start_node));
        }

        for terminal in &self.terminal_nodes {
            if !self.has_node(terminal) {
                errors.push(format!("Terminal node '{terminal}' not found in nodes"));
            }
        }

        for edge in &self.edges {
            if let Some(source) = edge.from.node_id() {
                if !self.has_node(source) {
                    errors.push(format!("Edge '{}' references unknown source '{source}'", edge.id));
                }
            }
            if !self.has_node(&edge.to) {
                errors.push(format!("Edge '{}' references unknown target '{}'", edge.id, edge.to));
            }
        }

        for edge in &self.edges {
            if edge.kind == EdgeKind::BoundedRetry && edge.max_retries.is_none() {
                errors.push(format!("Bounded-retry edge '{}' missing max_retries", edge.id));
            }
        }

        for node in &self.nodes {
            if self.is_terminal(&node.id) {
                continue;
            }
            if !self.edges.iter().any(|e| e.from.matches(&node.id)) {
                errors.push(format!("Node '{}' has no outgoing edges", node.id));
            }
        }

        errors
    }

    /// Bump an edge's success or failure statistic.
    pub fn record_edge_outcome(&mut self, edge_id: &str, success: bool) -> bool {
        match self.edge_mut(edge_id) {
            Some(edge) => {
                if success {
                    edge.stats.record_success();
                } else {
                    edge.stats.record_failure();
                }
                true
            }
            None => false,
        }
    }

    pub fn relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.id == id)
    }

    pub fn relationship_mut(&mut self, id: &str) -> Option<&mut Relationship> {
        self.relationships.iter_mut().find(|r| r.id == id)
    }

    /// Add a relationship, replacing any with the same id.
    pub fn add_relationship(&mut self, relationship: Relationship) {
        match self.relationships.iter_mut().find(|r| r.id == relationship.id) {
            Some(existing) => *existing = relationship,
            None => self.relationships.push(relationship),
        }
    }

    /// Adjust the relationship between two concepts, creating a `correlates`
    /// relationship weighted `1 + delta` if none exists yet.
    pub fn update_relationship_weight(
        &mut self,
        from: &str,
        to: &str,
        delta: f64,
        observation: impl Into<String>,
    ) {
        let observation = observation.into();
        if let Some(existing) = self.relationships.iter_mut().find(|r| r.from == from && r.to == to) {
            existing.update_weight(delta, observation);
            return;
        }

        let mut relationship = Relationship::new(
            uuid::Uuid::new_v4().to_string(),
            from,
            to,
            RelationType::Correlates,
            1.0 + delta,
        );
        relationship.observations.push(observation);
        self.relationships.push(relationship);
    }

    /// Arithmetic mean of edge usage (successes plus failures).
    pub fn average_edge_usage(&self) -> f64 {
        if self.edges.is_empty() {
            return 0.0;
        }
        let total: u64 = self.edges.iter().map(|e| e.stats.total()).sum();
        total as f64 / self.edges.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear_graph() -> Graph {
        Graph::new("demo", "intake")
            .with_node(Node::new("intake", NodeKind::Intake).with_stage(Stage::Intake))
            .with_node(Node::new("work", NodeKind::Reasoning))
            .with_node(Node::new("done", NodeKind::Terminal(TerminalConfig::default())))
            .with_edge(Edge::new("e1", "intake", "work", EdgeKind::Standard))
            .with_edge(Edge::new("e2", "work", "done", EdgeKind::Standard))
            .with_terminal("done")
    }

    #[test]
    fn test_valid_graph_has_no_errors() {
        assert!(linear_graph().validate().is_empty());
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let mut graph = linear_graph();
        graph.start_node = "missing".to_string();
        graph.add_terminal("ghost");
        graph.add_edge(Edge::new("e3", "nowhere", "work", EdgeKind::BoundedRetry));
        graph.add_node(Node::new("orphan", NodeKind::Merge));

        let errors = graph.validate();
        assert_eq!(errors.len(), 5, "got: {errors:?}");
        assert!(errors.iter().any(|e| e.contains("Start node 'missing'")));
        assert!(errors.iter().any(|e| e.contains("Terminal node 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("unknown source 'nowhere'")));
        assert!(errors.iter().any(|e| e.contains("'e3' missing max_retries")));
        assert!(errors.iter().any(|e| e.contains("'orphan' has no outgoing edges")));
    }

    #[test]
    fn test_wildcard_edge_counts_as_outgoing() {
        let mut graph = linear_graph();
        graph.add_node(Node::new("orphan", NodeKind::Merge));
        graph.add_edge(Edge::new("any", "*", "done", EdgeKind::Standard).with_priority(99));
        assert!(graph.validate().is_empty());
        assert_eq!(graph.outgoing_edges("orphan").len(), 1);
    }

    #[test]
    fn test_outgoing_edges_sorted_by_priority_then_declaration() {
        let graph = linear_graph()
            .with_edge(Edge::new("b", "work", "done", EdgeKind::Standard).with_priority(2))
            .with_edge(Edge::new("a", "work", "intake", EdgeKind::Standard).with_priority(0))
            .with_edge(Edge::new("c", "work", "done", EdgeKind::Standard).with_priority(2));

        let ids: Vec<&str> = graph.outgoing_edges("work").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e2", "b", "c"]);
    }

    #[test]
    fn test_edge_stats_are_monotonic_and_weight_bounded() {
        let mut graph = linear_graph();
        for _ in 0..100 {
            graph.record_edge_outcome("e1", true);
        }
        let stats = &graph.edge("e1").unwrap().stats;
        assert_eq!(stats.success_count, 100);
        assert!(stats.weight <= MAX_WEIGHT && stats.weight > 1.9);

        for _ in 0..100 {
            graph.record_edge_outcome("e1", false);
        }
        let stats = &graph.edge("e1").unwrap().stats;
        assert_eq!(stats.failure_count, 100);
        assert!(stats.weight >= MIN_WEIGHT && stats.weight < 0.1);
        assert!(!graph.record_edge_outcome("missing", true));
    }

    #[test]
    fn test_relationship_weight_clamped() {
        let mut graph = linear_graph();
        graph.update_relationship_weight("work", "timeouts", 0.5, "slow tool");
        let rel = &graph.relationships[0];
        assert_eq!(rel.kind, RelationType::Correlates);
        assert!((rel.weight - 1.5).abs() < 0.001);

        graph.update_relationship_weight("work", "timeouts", 5.0, "again");
        assert!((graph.relationships[0].weight - 2.0).abs() < 0.001);
        assert_eq!(graph.relationships[0].observations.len(), 2);

        graph.update_relationship_weight("work", "timeouts", -9.0, "recovered");
        assert!(graph.relationships[0].weight.abs() < 0.001);
    }

    #[test]
    fn test_yaml_round_trip_is_exact() {
        let mut graph = linear_graph()
            .with_node(
                Node::new(
                    "route",
                    NodeKind::Decision(DecisionConfig {
                        variable: "data.score".to_string(),
                        rules: vec![DecisionRule {
                            condition: "> 0.5".to_string(),
                            target: "done".to_string(),
                        }],
                        precondition: None,
                    }),
                )
                .with_state_write("research.summary", "summary"),
            )
            .with_edge(
                Edge::new("retry", "route", "work", EdgeKind::BoundedRetry)
                    .with_max_retries(2)
                    .with_guard("data.verification_passed == False")
                    .with_action(EdgeAction::SetState {
                        path: "retrying".to_string(),
                        value: json!(true),
                    }),
            );
        graph.record_edge_outcome("e1", true);
        graph.record_edge_outcome("e2", false);
        graph.update_relationship_weight("work", "done", 0.25, "observed");

        let yaml = serde_yaml::to_string(&graph).unwrap();
        assert!(yaml.contains("graph:"));
        let restored: Graph = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored, graph);
    }

    #[test]
    fn test_wildcard_serializes_as_star() {
        let edge = Edge::new("any", "*", "done", EdgeKind::Standard);
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["from"], json!("*"));
        assert_eq!(edge.from, EdgeSource::Any);
    }

    #[test]
    fn test_node_kind_tagging() {
        let node: Node = serde_json::from_value(json!({
            "id": "tool",
            "kind": {"type": "tool_execution", "skill": "search", "params": {"depth": 2}}
        }))
        .unwrap();
        let NodeKind::ToolExecution(config) = &node.kind else {
            panic!("expected tool execution node");
        };
        assert_eq!(config.skill.as_deref(), Some("search"));
        assert_eq!(node.stage, Stage::Execution);
    }
}
