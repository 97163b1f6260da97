//! The execution controller: a deterministic state machine over a brain's
//! graph.
//!
//! One run walks the graph one node at a time. Each step executes the
//! current node ([`nodes`]), folds its result into the run state, enforces
//! the guardrails ([`constraints`]) and then picks the next edge
//! ([`routing`]). The loop ends when a terminal node completes, a terminal
//! node is revisited, the step budget runs out, a node errors, a guardrail
//! halts the run, or no edge is accepted.

mod constraints;
mod nodes;
mod routing;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditAction, Constraints, ExecutionConfig, Graph, LastResult, Node, NodeKind, NodeResult, RunOutcome,
    RunResult, RunState,
};
use crate::domain::ports::{CompletionClient, GraphRepository, NullRunArchive, RunArchive, SkillExecutor};
use crate::services::memory_store::MemoryStore;

/// Working-data path where candidate facts wait for a memory-write node.
pub const PENDING_FACTS: &str = "pending_facts";

/// How a step ended the run, when it did.
type Halt = (RunOutcome, Option<String>);

/// Drives runs of one brain.
///
/// The controller owns its graph for the duration of its life; edge
/// statistics accumulate on it across runs and are saved through the graph
/// repository, when one is configured, at the end of every run.
pub struct BrainController {
    brain_id: String,
    graph: Graph,
    memory: Arc<MemoryStore>,
    completion: Arc<dyn CompletionClient>,
    skills: Option<Arc<dyn SkillExecutor>>,
    constraints: Constraints,
    config: ExecutionConfig,
    run_archive: Arc<dyn RunArchive>,
    graph_repository: Option<Arc<dyn GraphRepository>>,
}

impl BrainController {
    pub fn new(graph: Graph, memory: Arc<MemoryStore>, completion: Arc<dyn CompletionClient>) -> Self {
        Self {
            brain_id: graph.name().to_string(),
            graph,
            memory,
            completion,
            skills: None,
            constraints: Constraints::default(),
            config: ExecutionConfig::default(),
            run_archive: Arc::new(NullRunArchive),
            graph_repository: None,
        }
    }

    pub fn with_brain_id(mut self, brain_id: impl Into<String>) -> Self {
        self.brain_id = brain_id.into();
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillExecutor>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_run_archive(mut self, archive: Arc<dyn RunArchive>) -> Self {
        self.run_archive = archive;
        self
    }

    pub fn with_graph_repository(mut self, repository: Arc<dyn GraphRepository>) -> Self {
        self.graph_repository = Some(repository);
        self
    }

    pub fn brain_id(&self) -> &str {
        &self.brain_id
    }

    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Execute one run with a fresh run id.
    ///
    /// # Errors
    /// Only [`DomainError::InvalidGraph`]: the graph is validated before the
    /// run starts. Every other failure is reported through the outcome of
    /// the returned [`RunResult`].
    pub async fn run(&mut self, user_request: &str, initial_data: Option<Value>) -> DomainResult<RunResult> {
        self.run_with_id(Uuid::new_v4(), user_request, initial_data).await
    }

    /// Execute one run under a caller-chosen run id.
    pub async fn run_with_id(
        &mut self,
        run_id: Uuid,
        user_request: &str,
        initial_data: Option<Value>,
    ) -> DomainResult<RunResult> {
        let errors = self.graph.validate();
        if !errors.is_empty() {
            warn!(brain = %self.brain_id, violations = errors.len(), "graph failed validation, run not started");
            return Err(DomainError::InvalidGraph(errors));
        }

        let mut state = RunState::new(&self.brain_id, user_request, &self.graph.start_node).with_run_id(run_id);
        if let Some(data) = initial_data {
            state.apply_patch(data);
        }

        info!(run_id = %run_id, brain = %self.brain_id, start_node = %self.graph.start_node, "run started");
        let (outcome, error) = self.drive(&mut state).await;
        Ok(self.finish(state, outcome, error).await)
    }

    async fn drive(&mut self, state: &mut RunState) -> Halt {
        loop {
            if state.counters.total_steps >= self.config.max_steps {
                let node_id = state.current_node.clone();
                warn!(run_id = %state.run_id, node_id = %node_id, max_steps = self.config.max_steps, "step budget exhausted");
                state.signals.record_failure(&node_id, "Max steps exceeded", json!({"max_steps": self.config.max_steps}));
                state.record_audit(&node_id, AuditAction::StepBudgetExceeded, json!({"max_steps": self.config.max_steps}));
                let error = DomainError::StepBudgetExceeded {
                    max_steps: self.config.max_steps,
                };
                return (RunOutcome::MaxSteps, Some(error.to_string()));
            }

            let node_id = state.current_node.clone();
            if self.graph.is_terminal(&node_id) && state.counters.visits(&node_id) > 0 {
                warn!(run_id = %state.run_id, node_id = %node_id, "terminal node revisited, forcing termination");
                state.record_audit(&node_id, AuditAction::ForcedTermination, json!({"visits": state.counters.visits(&node_id)}));
                return (self.terminal_outcome(&node_id, state), None);
            }

            let Some(node) = self.graph.node(&node_id).cloned() else {
                let error = DomainError::NodeNotFound(node_id.clone());
                state.record_audit(&node_id, AuditAction::Error, json!({"error": error.to_string()}));
                return (RunOutcome::Error, Some(error.to_string()));
            };

            state.visit(&node.id, node.stage);
            debug!(run_id = %state.run_id, node_id = %node.id, kind = node.kind.as_str(), step = state.counters.total_steps, "executing node");

            let result = match self.execute_node(&node, state).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(run_id = %state.run_id, node_id = %node.id, error = %err, "node execution error");
                    state.record_audit(&node.id, AuditAction::Error, json!({"error": err.to_string()}));
                    state.signals.record_failure(&node.id, err.to_string(), Value::Null);
                    return (RunOutcome::Error, Some(err.to_string()));
                }
            };

            apply_node_result(&node, state, &result);

            if let Some(halt) = self.enforce_constraints(&node, state) {
                return halt;
            }

            if self.graph.is_terminal(&node.id) && (node.kind.is_terminal() || state.is_done()) {
                return (self.terminal_outcome(&node.id, state), None);
            }

            let Some(next) = self.select_edge(&node, state, &result) else {
                debug!(run_id = %state.run_id, node_id = %node.id, "no outgoing edge accepted");
                state.record_audit(&node.id, AuditAction::NoValidEdge, json!({"message": "No valid outgoing edge found"}));
                state.signals.record_failure(&node.id, "No valid outgoing edge", Value::Null);
                let error = DomainError::NoValidEdge { node_id: node.id.clone() };
                return (RunOutcome::Failure, Some(error.to_string()));
            };
            state.current_node = next;

            let interval = self.config.audit_flush_interval.max(1);
            if state.counters.total_steps % interval == 0 {
                self.flush_audit(state).await;
            }
        }
    }

    /// Resolve the outcome of a run ending at a terminal node: the node's
    /// declared outcome, then the configured mapping, then the conventional
    /// ids, then the configured default.
    fn terminal_outcome(&self, node_id: &str, state: &mut RunState) -> RunOutcome {
        if let Some(NodeKind::Terminal(config)) = self.graph.node(node_id).map(|n| &n.kind) {
            if let Some(outcome) = config.outcome {
                return outcome;
            }
        }
        if let Some(outcome) = self.config.terminal_outcomes.get(node_id) {
            return *outcome;
        }
        match node_id {
            "success" => RunOutcome::Success,
            "failure" => RunOutcome::Failure,
            "escalate" => RunOutcome::Escalated,
            _ => {
                let outcome = self.config.default_terminal_outcome;
                warn!(node_id = %node_id, outcome = outcome.as_str(), "terminal node has no explicit outcome, using default");
                state.signals.record_observation(
                    format!("Terminal '{node_id}' has no explicit outcome"),
                    json!({"default": outcome.as_str()}),
                );
                outcome
            }
        }
    }

    async fn flush_audit(&self, state: &mut RunState) {
        let events = state.drain_audit();
        if events.is_empty() {
            return;
        }
        if let Err(err) = self.run_archive.append_audit(state.run_id, &events).await {
            warn!(run_id = %state.run_id, error = %err, events = events.len(), "failed to flush audit trail");
        }
    }

    async fn finish(&self, mut state: RunState, outcome: RunOutcome, error: Option<String>) -> RunResult {
        self.flush_audit(&mut state).await;

        if let Err(err) = self.run_archive.save_final_state(&state).await {
            warn!(run_id = %state.run_id, error = %err, "failed to save final state");
        }
        if let Some(repository) = &self.graph_repository {
            if let Err(err) = repository.save(&self.graph).await {
                warn!(run_id = %state.run_id, error = %err, "failed to save graph");
            }
        }

        info!(
            run_id = %state.run_id,
            outcome = %outcome,
            final_node = %state.current_node,
            steps = state.counters.total_steps,
            "run finished"
        );
        RunResult::from_state(state, outcome, error)
    }
}

/// Fold a node result into the run state and audit it.
fn apply_node_result(node: &Node, state: &mut RunState, result: &NodeResult) {
    if !result.state_patch.is_empty() {
        state.apply_patch(Value::Object(result.state_patch.clone()));
    }
    state.last_output = result.output.clone();
    state.last_result = Some(LastResult {
        node_id: node.id.clone(),
        success: result.success,
        error: result.error.clone(),
    });

    if !result.success {
        let reason = result.error.clone().unwrap_or_else(|| "Node reported failure".to_string());
        state.signals.record_failure(&node.id, reason, json!({"kind": node.kind.as_str()}));
    }

    let patched: Vec<&String> = result.state_patch.keys().collect();
    state.record_audit(
        &node.id,
        AuditAction::NodeExecuted,
        json!({
            "kind": node.kind.as_str(),
            "success": result.success,
            "error": result.error,
            "patched": patched,
        }),
    );
}
