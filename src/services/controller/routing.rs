//! Edge selection.
//!
//! Candidates are the node's outgoing edges in priority order. A decision
//! node's chosen target wins outright; otherwise the first edge whose kind
//! preconditions and guard hold, and whose retry budget is not exhausted,
//! is taken.

use serde_json::{json, Value};
use tracing::debug;

use super::nodes::pending_questions;
use super::BrainController;
use crate::domain::models::{DecompositionConfig, DependencyConfig, Edge, EdgeAction, EdgeKind, Node, NodeResult, RunState};

const DEFAULT_QUESTION: &str = "The workflow needs your input to continue.";

impl BrainController {
    /// Pick and traverse the next edge, returning its target.
    pub(super) fn select_edge(&mut self, node: &Node, state: &mut RunState, result: &NodeResult) -> Option<String> {
        let candidates: Vec<Edge> = self.graph.outgoing_edges(&node.id).into_iter().cloned().collect();

        if let Some(target) = &result.decision_target {
            if let Some(edge) = candidates.iter().find(|e| &e.to == target) {
                debug!(node_id = %node.id, edge_id = %edge.id, target = %target, "following decision");
                return Some(self.traverse(node, edge, state));
            }
            debug!(node_id = %node.id, target = %target, "decision target has no edge, falling back to guards");
        }

        let context = state.to_context();
        for edge in &candidates {
            let admitted = match edge.kind {
                EdgeKind::DependsOn => edge
                    .dependency
                    .as_ref()
                    .map_or(true, |dependency| dependencies_met(dependency, state)),
                EdgeKind::DecomposesInto => edge
                    .decomposition
                    .as_ref()
                    .map_or(true, |decomposition| decomposition_allowed(decomposition, state)),
                _ => true,
            };
            if !admitted || !edge.guard.evaluate(&context) {
                continue;
            }

            if edge.kind == EdgeKind::BoundedRetry {
                let ceiling = edge.max_retries.unwrap_or(0);
                let used = state.counters.retries(&edge.id);
                if used >= ceiling {
                    debug!(edge_id = %edge.id, retries = used, ceiling, "retry budget exhausted");
                    self.graph.record_edge_outcome(&edge.id, false);
                    continue;
                }
                let count = state.consume_retry(&edge.id);
                debug!(edge_id = %edge.id, retry = count, ceiling, "retrying");
            }

            return Some(self.traverse(node, edge, state));
        }

        None
    }

    fn traverse(&mut self, node: &Node, edge: &Edge, state: &mut RunState) -> String {
        for action in &edge.on_traverse {
            match action {
                EdgeAction::AnalyzeFailure => state.signals.record_improvement(
                    "Consider adjusting approach after verification failure",
                    json!({"current_approach": node.id, "edge_id": edge.id}),
                ),
                EdgeAction::AdjustApproach => state.set("needs_approach_adjustment", Value::Bool(true)),
                EdgeAction::AskUser { question } => {
                    let mut questions = pending_questions(state);
                    questions.push(json!(question.as_deref().unwrap_or(DEFAULT_QUESTION)));
                    state.set("pending_questions", Value::Array(questions));
                }
                EdgeAction::SetState { path, value } => state.set(path, value.clone()),
            }
        }

        self.graph.record_edge_outcome(&edge.id, true);
        state.signals.record_success(&node.id, Some(edge.id.clone()));
        debug!(run_id = %state.run_id, edge_id = %edge.id, from = %node.id, to = %edge.to, kind = edge.kind.as_str(), "edge traversed");
        edge.to.clone()
    }
}

fn dependencies_met(dependency: &DependencyConfig, state: &RunState) -> bool {
    let visited = |id: &String| state.counters.visits(id) > 0;
    let nodes_ok = if dependency.required_nodes.is_empty() {
        true
    } else if dependency.require_all {
        dependency.required_nodes.iter().all(visited)
    } else {
        dependency.required_nodes.iter().any(visited)
    };
    nodes_ok
        && dependency
            .required_state
            .iter()
            .all(|(path, expected)| state.get(path) == Some(expected))
}

fn decomposition_allowed(decomposition: &DecompositionConfig, state: &RunState) -> bool {
    let parent = &decomposition.parent_id;
    let status = state
        .get(&format!("task_status.{parent}"))
        .and_then(Value::as_str)
        .unwrap_or("pending");
    if !decomposition.allowed_statuses.iter().any(|s| s == status) {
        return false;
    }
    let children = state
        .get(&format!("task_children.{parent}"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    children < decomposition.max_children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Stage;
    use serde_json::Map;

    fn state() -> RunState {
        RunState::new("brain", "req", "start")
    }

    #[test]
    fn test_dependencies_require_visits_and_state() {
        let mut required_state = Map::new();
        required_state.insert("plan.approved".to_string(), json!(true));
        let dependency = DependencyConfig {
            required_nodes: vec!["research".to_string(), "plan".to_string()],
            require_all: true,
            required_state,
        };

        let mut state = state();
        state.visit("research", Stage::Research);
        assert!(!dependencies_met(&dependency, &state));

        state.visit("plan", Stage::Research);
        assert!(!dependencies_met(&dependency, &state));

        state.set("plan.approved", json!(true));
        assert!(dependencies_met(&dependency, &state));
    }

    #[test]
    fn test_any_dependency_suffices_when_not_all_required() {
        let dependency = DependencyConfig {
            required_nodes: vec!["a".to_string(), "b".to_string()],
            require_all: false,
            required_state: Map::new(),
        };
        let mut state = state();
        assert!(!dependencies_met(&dependency, &state));
        state.visit("b", Stage::Research);
        assert!(dependencies_met(&dependency, &state));
    }

    #[test]
    fn test_decomposition_limits() {
        let decomposition = DecompositionConfig {
            parent_id: "epic".to_string(),
            max_children: 2,
            allowed_statuses: vec!["pending".to_string(), "in_progress".to_string()],
        };
        let mut state = state();
        assert!(decomposition_allowed(&decomposition, &state));

        state.set("task_children.epic", json!(["c1", "c2"]));
        assert!(!decomposition_allowed(&decomposition, &state));

        state.set("task_children.epic", json!(["c1"]));
        state.set("task_status.epic", json!("done"));
        assert!(!decomposition_allowed(&decomposition, &state));
    }
}
