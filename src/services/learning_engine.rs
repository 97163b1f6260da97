//! Learning engine: turns finished runs into graph change proposals.
//!
//! Analysis and proposal generation are pure functions of the runs and the
//! graph. Applying a change mutates the graph in place; persisting the
//! result is the caller's job (see the evolution engine).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::graph::{MAX_WEIGHT, MIN_WEIGHT};
use crate::domain::models::{
    Change, ChangeKind, Edge, EdgeKind, FailureSignal, Graph, LearningConfig, LearningMode,
    Proposal, ProposalStatus, RelationType, Relationship, RiskLevel, RunAnalysis, RunOutcome, RunResult,
};

/// Concept on the source side of failure-indicator relationships.
pub const FAILURE_SOURCE: &str = "execution";

/// Bottleneck threshold relative to the per-run average visit count.
const BOTTLENECK_FACTOR: f64 = 2.0;
const OVERUSE_FACTOR: f64 = 2.0;
const UNDERUSE_FACTOR: f64 = 0.5;
const WEIGHT_STEP: f64 = 0.1;

/// Patterns collected across many analyses.
#[derive(Debug, Default)]
struct Aggregate {
    total_runs: usize,
    run_ids: Vec<uuid::Uuid>,
    /// Runs in which each edge was traversed at least once.
    edge_successes: BTreeMap<String, usize>,
    bottleneck_frequency: BTreeMap<String, usize>,
    retry_history: BTreeMap<String, Vec<u32>>,
    overused_edges: BTreeMap<String, usize>,
    underused_edges: BTreeMap<String, usize>,
    failures: Vec<FailureSignal>,
}

impl Aggregate {
    fn collect(analyses: &[RunAnalysis]) -> Self {
        let mut aggregate = Self {
            total_runs: analyses.len(),
            ..Self::default()
        };
        for analysis in analyses {
            aggregate.run_ids.push(analysis.run_id);
            for edge_id in &analysis.successful_edges {
                *aggregate.edge_successes.entry(edge_id.clone()).or_insert(0) += 1;
            }
            for node_id in &analysis.bottleneck_nodes {
                *aggregate.bottleneck_frequency.entry(node_id.clone()).or_insert(0) += 1;
            }
            for (edge_id, retries) in &analysis.retries_by_edge {
                aggregate.retry_history.entry(edge_id.clone()).or_default().push(*retries);
            }
            for edge_id in &analysis.overused_edges {
                *aggregate.overused_edges.entry(edge_id.clone()).or_insert(0) += 1;
            }
            for edge_id in &analysis.underused_edges {
                *aggregate.underused_edges.entry(edge_id.clone()).or_insert(0) += 1;
            }
            aggregate.failures.extend(analysis.failures.iter().cloned());
        }
        aggregate
    }
}

/// Analyzes runs and proposes, then applies, graph changes.
#[derive(Debug, Clone, Default)]
pub struct LearningEngine {
    config: LearningConfig,
}

impl LearningEngine {
    pub const fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Summarize one finished run against the graph it ran on.
    pub fn analyze_run(&self, result: &RunResult, graph: &Graph) -> RunAnalysis {
        let state = &result.final_state;

        let mut path_taken: Vec<String> = Vec::new();
        for node_id in &state.trail {
            if path_taken.last() != Some(node_id) {
                path_taken.push(node_id.clone());
            }
        }

        let successful_edges: Vec<String> = state
            .signals
            .successes
            .iter()
            .filter_map(|s| s.edge_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let visits = &state.counters.node_visits;
        let average_visits = if visits.is_empty() {
            0.0
        } else {
            f64::from(visits.values().sum::<u32>()) / visits.len() as f64
        };
        let bottleneck_nodes = visits
            .iter()
            .filter(|(_, count)| f64::from(**count) > average_visits * BOTTLENECK_FACTOR)
            .map(|(id, _)| id.clone())
            .collect();

        let average_usage = graph.average_edge_usage();
        let mut underused_edges = Vec::new();
        let mut overused_edges = Vec::new();
        for edge in &graph.edges {
            let usage = edge.stats.total() as f64;
            if usage < average_usage * UNDERUSE_FACTOR {
                underused_edges.push(edge.id.clone());
            } else if usage > average_usage * OVERUSE_FACTOR {
                overused_edges.push(edge.id.clone());
            }
        }

        RunAnalysis {
            run_id: result.run_id,
            outcome: result.outcome,
            success: result.outcome.is_success(),
            total_steps: result.total_steps,
            duration_secs: result.duration_secs(),
            path_taken,
            retries_by_edge: state.counters.edge_retries.clone(),
            visits_by_node: visits.clone(),
            successful_edges,
            failures: state.signals.failures.clone(),
            improvements: state.signals.improvements.clone(),
            bottleneck_nodes,
            underused_edges,
            overused_edges,
        }
    }

    /// Propose changes from a set of analyses.
    ///
    /// Returns at most one proposal per category (edge priorities, retry
    /// ceilings, edge weights, failure relationships, structural bypasses); empty
    /// categories produce none.
    pub fn generate_proposals(&self, analyses: &[RunAnalysis], graph: &Graph) -> Vec<Proposal> {
        if analyses.is_empty() {
            return Vec::new();
        }
        let aggregate = Aggregate::collect(analyses);

        let categories = [
            (self.propose_priority_changes(&aggregate, graph), "edge priorities based on success patterns", 0.7),
            (self.propose_retry_changes(&aggregate, graph), "retry limits based on usage patterns", 0.65),
            (self.propose_weight_changes(&aggregate, graph), "edge weights based on usage", 0.6),
            (self.propose_relationship_changes(&aggregate, graph), "relationships based on observed failures", 0.6),
            (self.propose_structural_changes(&aggregate, graph), "structural bypasses for bottleneck nodes", 0.5),
        ];

        let proposals: Vec<Proposal> = categories
            .into_iter()
            .filter(|(changes, _, _)| !changes.is_empty())
            .map(|(changes, topic, confidence)| {
                let summary = format!("Adjust {} {topic}", changes.len());
                Proposal::new(changes, summary, confidence, aggregate.run_ids.clone())
            })
            .collect();

        info!(
            runs = aggregate.total_runs,
            proposals = proposals.len(),
            changes = proposals.iter().map(|p| p.changes.len()).sum::<usize>(),
            "proposals generated"
        );
        proposals
    }

    /// Edges traversed in most runs gain precedence (a lower priority value).
    fn propose_priority_changes(&self, aggregate: &Aggregate, graph: &Graph) -> Vec<Change> {
        let mut changes = Vec::new();
        for edge in &graph.edges {
            let successes = aggregate.edge_successes.get(&edge.id).copied().unwrap_or(0);
            if successes == 0 {
                continue;
            }
            let success_rate = successes as f64 / aggregate.total_runs as f64;
            if success_rate <= self.config.priority_success_rate || edge.priority <= 2 {
                continue;
            }
            let new = (edge.priority - 1).max(1);
            let change = Change::new(
                ChangeKind::UpdateEdgePriority {
                    edge_id: edge.id.clone(),
                    old: edge.priority,
                    new,
                },
                format!("Lower priority (higher precedence) for edge {}", edge.id),
                format!(
                    "Edge succeeds {:.0}% of the time but has priority {}",
                    success_rate * 100.0,
                    edge.priority
                ),
                success_rate.min(0.9),
            );
            self.push_change(&mut changes, change, self.config.auto_update.edge_priorities);
        }
        changes
    }

    /// Widen retry ceilings that are often exhausted, narrow idle ones.
    fn propose_retry_changes(&self, aggregate: &Aggregate, graph: &Graph) -> Vec<Change> {
        let mut changes = Vec::new();
        for (edge_id, history) in &aggregate.retry_history {
            let Some(edge) = graph.edge(edge_id) else {
                continue;
            };
            let Some(ceiling) = edge.max_retries.filter(|_| edge.kind == EdgeKind::BoundedRetry) else {
                continue;
            };
            if ceiling == 0 {
                continue;
            }

            // Runs that never touched the edge count as zero retries.
            let runs = aggregate.total_runs.max(history.len()) as f64;
            let average = f64::from(history.iter().sum::<u32>()) / runs;
            let at_cap = history.iter().filter(|r| **r >= ceiling).count() as f64 / runs;

            let change = if at_cap >= self.config.retry_cap_ratio {
                Change::new(
                    ChangeKind::UpdateMaxRetries {
                        edge_id: edge_id.clone(),
                        old: Some(ceiling),
                        new: ceiling + 1,
                    },
                    format!("Increase max_retries for edge {edge_id}"),
                    format!(
                        "Edge hits its retry limit in {:.0}% of runs (avg: {average:.1}, max: {ceiling})",
                        at_cap * 100.0
                    ),
                    (0.6 + 0.3 * at_cap).min(0.9),
                )
            } else if average < 0.5 && ceiling > 1 {
                Change::new(
                    ChangeKind::UpdateMaxRetries {
                        edge_id: edge_id.clone(),
                        old: Some(ceiling),
                        new: ceiling - 1,
                    },
                    format!("Decrease max_retries for edge {edge_id}"),
                    format!("Retries rarely needed (avg: {average:.1})"),
                    0.6,
                )
            } else {
                continue;
            };
            self.push_change(&mut changes, change, self.config.auto_update.max_retries);
        }
        changes
    }

    /// Edges flagged over- or under-used in at least half of the runs move
    /// their weight one step up or down.
    fn propose_weight_changes(&self, aggregate: &Aggregate, graph: &Graph) -> Vec<Change> {
        let mut changes = Vec::new();
        for edge in &graph.edges {
            let over = aggregate.overused_edges.get(&edge.id).copied().unwrap_or(0);
            let under = aggregate.underused_edges.get(&edge.id).copied().unwrap_or(0);
            let (count, delta, usage) = if over > under {
                (over, WEIGHT_STEP, "over-used")
            } else {
                (under, -WEIGHT_STEP, "under-used")
            };
            let share = count as f64 / aggregate.total_runs as f64;
            if count == 0 || share < 0.5 {
                continue;
            }

            let old = edge.stats.weight;
            let new = (old + delta).clamp(MIN_WEIGHT, MAX_WEIGHT);
            if (new - old).abs() < f64::EPSILON {
                continue;
            }
            let verb = if delta > 0.0 { "Raise" } else { "Lower" };
            let change = Change::new(
                ChangeKind::UpdateEdgeWeight {
                    edge_id: edge.id.clone(),
                    old,
                    new,
                },
                format!("{verb} weight of edge {}", edge.id),
                format!("Edge is {usage} in {count}/{} runs", aggregate.total_runs),
                share.min(0.9),
            );
            self.push_change(&mut changes, change, self.config.auto_update.edge_weights);
        }
        changes
    }

    /// Nodes that fail repeatedly get, or strengthen, a failure-indicator
    /// relationship.
    fn propose_relationship_changes(&self, aggregate: &Aggregate, graph: &Graph) -> Vec<Change> {
        let mut failure_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for failure in &aggregate.failures {
            *failure_counts.entry(failure.node_id.as_str()).or_insert(0) += 1;
        }

        let mut changes = Vec::new();
        for (node_id, count) in failure_counts {
            if count < self.config.failure_threshold || !graph.has_node(node_id) {
                continue;
            }
            let confidence = (0.5 + 0.1 * count as f64).min(0.9);
            let existing = graph
                .relationships
                .iter()
                .find(|r| r.to == node_id && r.kind == RelationType::Indicates);

            let change = match existing {
                Some(relationship) => Change::new(
                    ChangeKind::UpdateRelationship {
                        relationship_id: relationship.id.clone(),
                        old_weight: relationship.weight,
                        new_weight: (relationship.weight + 0.1 * count as f64).min(2.0),
                    },
                    format!("Increase failure relationship weight for {node_id}"),
                    format!("Node failed {count} times"),
                    confidence,
                ),
                None => Change::new(
                    ChangeKind::AddRelationship {
                        relationship: Relationship::new(
                            format!("failure_indicator_{node_id}"),
                            FAILURE_SOURCE,
                            node_id,
                            RelationType::Indicates,
                            0.5 + 0.1 * count as f64,
                        ),
                    },
                    format!("Add failure indicator relationship for {node_id}"),
                    format!("Node failed {count} times across runs"),
                    confidence,
                ),
            };
            self.push_change(&mut changes, change, self.config.auto_update.relationship_weights);
        }
        changes
    }

    /// Suggest a bypass around nodes that are bottlenecks in at least half
    /// of the runs. Always requires approval.
    fn propose_structural_changes(&self, aggregate: &Aggregate, graph: &Graph) -> Vec<Change> {
        let mut changes = Vec::new();
        for (node_id, frequency) in &aggregate.bottleneck_frequency {
            if (*frequency as f64) < aggregate.total_runs as f64 * 0.5 {
                continue;
            }
            let target = format!("bypass_{node_id}");
            let change = Change::new(
                ChangeKind::AddEdge {
                    target: target.clone(),
                    edge: bypass_edge(graph, node_id, &target),
                    suggestion: format!("Add alternative path around {node_id}"),
                },
                format!("Consider adding bypass for bottleneck node {node_id}"),
                format!("Node is bottleneck in {frequency}/{} runs", aggregate.total_runs),
                *frequency as f64 / aggregate.total_runs as f64,
            );
            self.push_change(&mut changes, change, false);
        }
        changes
    }

    /// Keep a change if it clears the confidence floor, setting its
    /// auto-apply flags from the policy.
    fn push_change(&self, changes: &mut Vec<Change>, mut change: Change, category_enabled: bool) {
        if change.confidence < self.config.min_confidence {
            debug!(target_id = change.kind.target(), confidence = change.confidence, "change below confidence floor");
            return;
        }
        if change.kind.is_structural() {
            change.auto_apply = false;
            change.requires_approval = true;
        } else {
            change.auto_apply = category_enabled && self.mode_allows(change.risk);
            change.requires_approval = !category_enabled;
        }
        changes.push(change);
    }

    fn mode_allows(&self, risk: RiskLevel) -> bool {
        match self.config.mode {
            LearningMode::Off | LearningMode::SuggestOnly => false,
            LearningMode::AutoSafe => risk <= RiskLevel::Medium,
            LearningMode::AutoAll => true,
        }
    }

    /// Apply one change to the graph.
    ///
    /// # Errors
    /// Fails when the target edge or relationship does not exist, or when a
    /// structural change carries no concrete edge.
    pub fn apply_change(graph: &mut Graph, change: &Change) -> DomainResult<()> {
        match &change.kind {
            ChangeKind::UpdateEdgePriority { edge_id, new, .. } => {
                edge_in(graph, edge_id)?.priority = *new;
            }
            ChangeKind::UpdateEdgeWeight { edge_id, new, .. } => {
                edge_in(graph, edge_id)?.stats.weight = *new;
            }
            ChangeKind::UpdateMaxRetries { edge_id, new, .. } => {
                edge_in(graph, edge_id)?.max_retries = Some(*new);
            }
            ChangeKind::AddRelationship { relationship } => graph.add_relationship(relationship.clone()),
            ChangeKind::UpdateRelationship {
                relationship_id,
                new_weight,
                ..
            } => {
                let relationship = graph
                    .relationship_mut(relationship_id)
                    .ok_or_else(|| DomainError::RelationshipNotFound(relationship_id.clone()))?;
                let delta = new_weight - relationship.weight;
                relationship.update_weight(delta, change.reason.clone());
            }
            ChangeKind::AddEdge { target, edge, .. } => {
                let edge = edge.clone().ok_or_else(|| {
                    DomainError::ValidationFailed(format!("Change '{target}' has no concrete edge to add"))
                })?;
                graph.add_edge(edge);
            }
        }
        Ok(())
    }

    /// Apply every change flagged auto-apply that needs no approval.
    ///
    /// Returns the changes applied (marked) and one message per failure.
    pub fn auto_apply_safe_changes(&self, graph: &mut Graph, proposals: &mut [Proposal]) -> (Vec<Change>, Vec<String>) {
        let mut applied = Vec::new();
        let mut errors = Vec::new();
        for proposal in proposals.iter_mut() {
            for change in proposal.changes.iter_mut().filter(|c| c.is_auto_applicable()) {
                match Self::apply_change(graph, change) {
                    Ok(()) => {
                        change.mark_applied();
                        info!(change_id = %change.change_id, kind = change.kind.as_str(), target_id = change.kind.target(), "change auto-applied");
                        applied.push(change.clone());
                    }
                    Err(err) => errors.push(format!("Failed to auto-apply {}: {err}", change.change_id)),
                }
            }
        }
        (applied, errors)
    }

    /// Apply the remaining changes of a proposal. Changes that require
    /// approval are applied only once the proposal is approved.
    pub fn apply_proposal(&self, graph: &mut Graph, proposal: &mut Proposal) -> (Vec<Change>, Vec<String>) {
        let approved = proposal.status == ProposalStatus::Approved;
        let mut applied = Vec::new();
        let mut errors = Vec::new();

        for change in proposal.changes.iter_mut().filter(|c| !c.applied) {
            if change.requires_approval && !approved {
                continue;
            }
            match Self::apply_change(graph, change) {
                Ok(()) => {
                    change.mark_applied();
                    info!(change_id = %change.change_id, kind = change.kind.as_str(), target_id = change.kind.target(), "change applied");
                    applied.push(change.clone());
                }
                Err(err) => errors.push(format!("Failed to apply {}: {err}", change.change_id)),
            }
        }
        (applied, errors)
    }

    /// One-line lesson describing a run, if it is worth remembering.
    pub fn lesson_for(analysis: &RunAnalysis) -> Option<(String, f64)> {
        match analysis.outcome {
            RunOutcome::Success => {
                let path: Vec<&str> = analysis.path_taken.iter().take(5).map(String::as_str).collect();
                Some((format!("Successful run pattern: {}", path.join(" -> ")), 0.8))
            }
            RunOutcome::Failure => {
                let nodes: BTreeSet<&str> = analysis.failures.iter().map(|f| f.node_id.as_str()).collect();
                if nodes.is_empty() {
                    return None;
                }
                let nodes: Vec<&str> = nodes.into_iter().collect();
                Some((format!("Failure pattern: issues at nodes {}", nodes.join(", ")), 0.7))
            }
            _ => None,
        }
    }
}

fn edge_in<'a>(graph: &'a mut Graph, edge_id: &str) -> DomainResult<&'a mut Edge> {
    graph
        .edge_mut(edge_id)
        .ok_or_else(|| DomainError::EdgeNotFound(edge_id.to_string()))
}

/// A concrete bypass from the node's first predecessor to its first other
/// successor, when both exist.
fn bypass_edge(graph: &Graph, node_id: &str, edge_id: &str) -> Option<Edge> {
    let from = graph
        .incoming_edges(node_id)
        .into_iter()
        .find_map(|e| e.from.node_id().filter(|source| *source != node_id))?
        .to_string();
    let to = graph
        .outgoing_edges(node_id)
        .into_iter()
        .map(|e| e.to.clone())
        .find(|target| target != node_id && *target != from)?;
    Some(Edge::new(edge_id, from, to, EdgeKind::Standard).with_priority(100))
}
