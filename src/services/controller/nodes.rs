//! Per-kind node behavior.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{BrainController, PENDING_FACTS};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::expression;
use crate::domain::models::document::{deep_merge, get_path, set_path};
use crate::domain::models::{
    ConflictAction, ConflictPolicy, DecisionConfig, Fact, GateConfig, MemoryQuery, Node, NodeKind, NodeResult,
    ParallelTask, Provenance, RunState, SkillConfig, SourceKind, TaskResult, TerminalAction, TerminalConfig,
};
use crate::services::parallel_executor::{ParallelExecutor, ParallelExecutorConfig};
use crate::services::template;

/// Operator prefixes that make a decision condition a comparison on `value`.
const VALUE_OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<", "in ", "not in ", "is "];

impl BrainController {
    pub(super) async fn execute_node(&self, node: &Node, state: &mut RunState) -> DomainResult<NodeResult> {
        match &node.kind {
            NodeKind::Intake => self.execute_reasoning(node, state, false).await,
            NodeKind::Reasoning => self.execute_reasoning(node, state, true).await,
            NodeKind::ToolExecution(config) => Ok(self.execute_tool(node, config, state).await),
            NodeKind::Merge => Ok(execute_merge(node, state)),
            NodeKind::MemoryWrite => self.execute_memory_write(node, state).await,
            NodeKind::QualityGate(config) => Ok(execute_gate(node, config, state)),
            NodeKind::Decision(config) => Ok(execute_decision(node, config, state)),
            NodeKind::Terminal(config) => Ok(execute_terminal(node, config, state)),
        }
    }

    /// Intake and reasoning: dredge, render, complete, extract.
    async fn execute_reasoning(&self, node: &Node, state: &mut RunState, reasoning: bool) -> DomainResult<NodeResult> {
        let dredged = self.dredge_memory(node, state).await;
        let context = self.prompt_context(state, &dredged);
        let prompt = template::render(&node.instruction, &context);

        let output = self
            .completion
            .complete(&prompt, node.output_schema.as_ref())
            .await
            .map_err(|err| DomainError::NodeExecution {
                node_id: node.id.clone(),
                message: err.to_string(),
            })?;

        let mut patch = extract_state_patch(node, &output);
        if !dredged.is_empty() {
            patch.insert("dredged_memory".to_string(), Value::Object(dredged));
        }

        if reasoning {
            if node.memory.write {
                let declared = declared_facts(&output, state, &node.id, SourceKind::Llm);
                if !declared.is_empty() {
                    patch.insert(PENDING_FACTS.to_string(), pending_with(state, declared));
                }
            }
            if let Some(Value::Array(items)) = output.get("parallel_tasks") {
                let tasks = parse_tasks(items, state);
                if !tasks.is_empty() {
                    let merged = self.run_parallel(node, state, tasks).await;
                    patch.insert("parallel_results".to_string(), merged);
                }
            }
        }

        if let Some(confidence) = output.get("confidence").and_then(Value::as_f64) {
            debug!(node_id = %node.id, confidence, "completion reported confidence");
        }

        let mut result = NodeResult::success(&node.id).with_output(output);
        result.state_patch = patch;
        Ok(result)
    }

    async fn execute_tool(&self, node: &Node, config: &SkillConfig, state: &mut RunState) -> NodeResult {
        let Some(skills) = &self.skills else {
            return NodeResult::failure(&node.id, "No skill executor configured");
        };
        let Some(skill) = config.skill.as_deref() else {
            return NodeResult::failure(&node.id, format!("Tool node '{}' missing skill name", node.id));
        };

        let context = state.to_context();
        let instruction = template::render(&node.instruction, &context);
        let output = match skills
            .execute(skill, &instruction, &Value::Object(context), &config.params)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(node_id = %node.id, skill, error = %err, "skill failed");
                return NodeResult::failure(&node.id, err.to_string()).with_output(json!({"error": err.to_string()}));
            }
        };
        state.counters.skills_invoked += 1;

        let mut patch = extract_state_patch(node, &output);
        let declared = declared_facts(&output, state, &node.id, SourceKind::Tool);
        if !declared.is_empty() {
            patch.insert(PENDING_FACTS.to_string(), pending_with(state, declared));
        }

        let mut result = NodeResult::success(&node.id).with_output(output);
        result.state_patch = patch;
        result
    }

    async fn execute_memory_write(&self, node: &Node, state: &mut RunState) -> DomainResult<NodeResult> {
        let source = node.memory.source.as_deref().unwrap_or(PENDING_FACTS);
        let facts: Vec<Fact> = state
            .get(source)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Fact::from_declared).collect())
            .unwrap_or_default();

        if facts.is_empty() {
            return Ok(NodeResult::success(&node.id)
                .with_patch("sediment_written", json!(0))
                .with_patch("sediment_conflicts", json!([])));
        }

        let policy = if node.memory.enforce_conflicts {
            ConflictPolicy::Skip
        } else if node.memory.conflict_action == ConflictAction::Overwrite {
            ConflictPolicy::Supersede
        } else {
            ConflictPolicy::Flag
        };

        let outcome = self
            .memory
            .write(facts, Some(state.run_id), Some(&node.id), policy)
            .await?;
        state.counters.memory_writes += u32::try_from(outcome.written.len()).unwrap_or(u32::MAX);
        if source == PENDING_FACTS {
            state.set(PENDING_FACTS, json!([]));
        }

        let conflicts = outcome.conflict_messages();
        let mut result = NodeResult::success(&node.id)
            .with_output(serde_json::to_value(&outcome)?)
            .with_patch("sediment_written", json!(outcome.written.len()))
            .with_patch("sediment_conflicts", json!(conflicts));

        if !conflicts.is_empty() {
            warn!(node_id = %node.id, conflicts = conflicts.len(), policy = ?policy, "memory conflicts detected");
            match node.memory.conflict_action {
                ConflictAction::Flag => {
                    result = result.with_patch("memory_conflicts", json!(conflicts));
                    state
                        .signals
                        .record_observation("Memory conflict detected", json!({"conflicts": conflicts}));
                }
                ConflictAction::Overwrite => {
                    state.signals.record_observation(
                        "Conflicting memory superseded",
                        json!({"conflicts": conflicts, "superseded": outcome.superseded}),
                    );
                }
                ConflictAction::Ask => {
                    let mut questions = pending_questions(state);
                    questions.extend(conflicts.iter().map(|c| json!(c)));
                    result = result.with_patch("pending_questions", Value::Array(questions));
                }
            }
        }

        Ok(result)
    }

    /// Run every dredge query of a node, keyed by `as_key`.
    async fn dredge_memory(&self, node: &Node, state: &RunState) -> Map<String, Value> {
        let mut dredged = Map::new();
        if node.memory.dredge.is_empty() {
            return dredged;
        }

        let context = state.to_context();
        for dredge in &node.memory.dredge {
            let mut query = MemoryQuery::new()
                .with_text(template::render(&dredge.query, &context))
                .with_limit(dredge.limit);
            query.subjects.clone_from(&dredge.subjects);
            query.predicates.clone_from(&dredge.predicates);

            let result = self.memory.query(&query).await;
            debug!(node_id = %node.id, key = %dredge.as_key, matches = result.total_matches, "memory dredged");
            dredged.insert(dredge.as_key.clone(), Value::String(result.to_summary()));
        }
        dredged
    }

    /// Template context: the run context plus dredged memory and skills.
    fn prompt_context(&self, state: &RunState, dredged: &Map<String, Value>) -> Map<String, Value> {
        let mut context = state.to_context();
        context.insert("dredged_memory".to_string(), Value::Object(dredged.clone()));
        let skills = self.skills.as_ref().map(|s| s.available_skills()).unwrap_or_default();
        context.insert("available_skills".to_string(), json!(skills));
        context
    }

    /// Fan tasks out through the parallel executor and record them.
    async fn run_parallel(&self, node: &Node, state: &mut RunState, tasks: Vec<ParallelTask>) -> Value {
        let config = node.parallel.clone().unwrap_or_default();
        for task in &tasks {
            state.parallel.spawn(task.clone());
            state.counters.parallel_tasks_spawned += 1;
        }

        let Some(skills) = &self.skills else {
            warn!(node_id = %node.id, tasks = tasks.len(), "parallel tasks declared without a skill executor");
            let results: Vec<_> = tasks
                .iter()
                .map(|t| TaskResult::failed(&t.task_id, "No skill executor configured", None, Duration::ZERO))
                .collect();
            for result in &results {
                state.parallel.finish(result);
            }
            return ParallelExecutor::merge(&results, config.merge_strategy);
        };

        let executor = ParallelExecutor::new(
            skills.clone(),
            ParallelExecutorConfig {
                max_concurrency: config.max_concurrent.min(self.config.max_parallel).max(1),
                task_timeout: Duration::from_secs(self.config.task_timeout_secs),
            },
        );
        let deadline = Duration::from_secs(config.timeout_secs.unwrap_or(self.config.parallel_timeout_secs));
        let results = executor.execute(tasks, config.wait_for_all, Some(deadline)).await;

        for result in &results {
            if state.parallel.finish(result) && result.is_success() {
                state.counters.parallel_tasks_completed += 1;
            }
        }
        debug!(
            node_id = %node.id,
            completed = results.iter().filter(|r| r.is_success()).count(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            "parallel tasks finished"
        );
        ParallelExecutor::merge(&results, config.merge_strategy)
    }
}

/// Collapse the run's finished fan-out tasks into a summary patch.
fn execute_merge(node: &Node, state: &RunState) -> NodeResult {
    let merged: Vec<Value> = state
        .parallel
        .completed
        .iter()
        .filter_map(|task| {
            task.result
                .as_ref()
                .map(|result| json!({"task_id": task.task_id, "skill": task.skill, "result": result}))
        })
        .collect();
    let failures: Vec<Value> = state
        .parallel
        .failed
        .iter()
        .map(|task| json!({"task_id": task.task_id, "skill": task.skill, "error": task.error}))
        .collect();

    NodeResult::success(&node.id)
        .with_output(json!({"merged": merged, "failed": failures}))
        .with_patch("merged_results", json!(merged))
        .with_patch("parallel_complete", json!(state.parallel.is_idle()))
        .with_patch("parallel_success_count", json!(state.parallel.completed.len()))
        .with_patch("parallel_failure_count", json!(state.parallel.failed.len()))
}

/// Evaluate every criterion; the gate passes only if all of them do.
fn execute_gate(node: &Node, config: &GateConfig, state: &mut RunState) -> NodeResult {
    let context = state.to_context();
    let mut passed = true;
    let results: Vec<Value> = config
        .criteria
        .iter()
        .map(|criterion| match expression::try_condition(&criterion.check, &context) {
            Ok(ok) => {
                passed &= ok;
                json!({"name": criterion.name, "passed": ok})
            }
            Err(err) => {
                passed = false;
                warn!(node_id = %node.id, criterion = %criterion.name, error = %err, "gate criterion could not be evaluated");
                json!({"name": criterion.name, "passed": false, "error": err.to_string()})
            }
        })
        .collect();

    if !passed {
        state
            .signals
            .record_failure(&node.id, "Gate check failed", json!({"results": results}));
    }
    debug!(node_id = %node.id, passed, "quality gate evaluated");

    NodeResult::success(&node.id)
        .with_output(json!({"passed": passed, "results": results}))
        .with_patch("verification_passed", json!(passed))
        .with_patch("gate_results", json!(results))
        .with_patch("gates", json!({ node.id.clone(): {"passed": passed, "results": results} }))
}

/// Route on one variable through an ordered rule table. Never calls the
/// model.
fn execute_decision(node: &Node, config: &DecisionConfig, state: &mut RunState) -> NodeResult {
    let context = state.to_context();

    if let Some(precondition) = &config.precondition {
        match expression::try_condition(precondition, &context) {
            Ok(true) => {}
            Ok(false) => {
                return NodeResult::success(&node.id)
                    .with_patch("decision_precondition_failed", json!(true))
                    .with_patch("decision_target", Value::Null);
            }
            Err(err) => {
                return NodeResult::failure(&node.id, format!("Decision precondition evaluation error: {err}"));
            }
        }
    }

    let value = lookup(&context, &config.variable).cloned().unwrap_or(Value::Null);
    let mut env = Map::new();
    env.insert("value".to_string(), value.clone());

    let mut matched = None;
    for rule in &config.rules {
        let condition = rule.condition.trim();
        if condition == "default" {
            matched = Some(rule);
            break;
        }
        match expression::try_condition(&rule_expression(condition), &env) {
            Ok(true) => {
                matched = Some(rule);
                break;
            }
            Ok(false) => {}
            Err(err) => {
                debug!(node_id = %node.id, condition, error = %err, "decision rule skipped");
                state.signals.record_observation(
                    format!("Decision rule evaluation error: {err}"),
                    json!({"rule": rule, "variable": config.variable, "value": value}),
                );
            }
        }
    }

    let target = matched.map(|rule| rule.target.clone());
    debug!(node_id = %node.id, variable = %config.variable, value = %value, target = ?target, "decision made");

    NodeResult::success(&node.id)
        .with_output(json!({"value": value, "target": target}))
        .with_patch("decision_variable", json!(config.variable))
        .with_patch("decision_value", value)
        .with_patch("decision_matched_rule", json!(matched))
        .with_patch("decision_target", json!(target))
        .with_decision(target)
}

fn execute_terminal(node: &Node, config: &TerminalConfig, state: &mut RunState) -> NodeResult {
    for action in &config.on_reach {
        match action {
            TerminalAction::TriggerLearning => state.signals.record_observation(
                format!("Terminal reached: {}", node.id),
                json!({"outcome": config.outcome.map(|o| o.as_str())}),
            ),
            TerminalAction::SetState { path, value } => state.set(path, value.clone()),
        }
    }
    NodeResult::success(&node.id).with_patch("done", json!(true))
}

/// A decision condition as an expression over `value`.
fn rule_expression(condition: &str) -> String {
    if VALUE_OPERATORS.iter().any(|op| condition.starts_with(op)) {
        format!("value {condition}")
    } else {
        condition.replace("$value", "value")
    }
}

/// Resolve a dot path whose first segment is a context key.
fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, tail) = path.split_once('.').unwrap_or((path, ""));
    get_path(context.get(head)?, tail)
}

/// State-write directives plus any direct `state_patch` in the output.
fn extract_state_patch(node: &Node, output: &Value) -> Map<String, Value> {
    let mut patch = Value::Object(Map::new());
    for write in &node.state_writes {
        let from = write.from.strip_prefix("output.").unwrap_or(&write.from);
        if let Some(value) = get_path(output, from).filter(|v| !v.is_null()) {
            set_path(&mut patch, &write.path, value.clone());
        }
    }
    if let Some(direct) = output.get("state_patch").filter(|v| v.is_object()) {
        deep_merge(&mut patch, direct.clone());
    }
    match patch {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Facts declared under `facts` in an output, stamped with their origin.
fn declared_facts(output: &Value, state: &RunState, node_id: &str, kind: SourceKind) -> Vec<Value> {
    let Some(Value::Array(items)) = output.get("facts") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Fact::from_declared)
        .map(|fact| {
            let fact = if fact.provenance.is_empty() {
                fact.with_provenance(Provenance::new(node_id, kind).with_origin(state.run_id, node_id))
            } else {
                fact
            };
            serde_json::to_value(fact).unwrap_or(Value::Null)
        })
        .filter(|v| !v.is_null())
        .collect()
}

/// The pending-facts list with `declared` appended.
fn pending_with(state: &RunState, declared: Vec<Value>) -> Value {
    let mut pending = state
        .get(PENDING_FACTS)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    pending.extend(declared);
    Value::Array(pending)
}

pub(super) fn pending_questions(state: &RunState) -> Vec<Value> {
    state
        .get("pending_questions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Parse model-declared fan-out tasks; tasks without a context get the run
/// context.
/// Declared tasks with unique ids; a repeated id gets a `-<n>` suffix.
fn parse_tasks(items: &[Value], state: &mut RunState) -> Vec<ParallelTask> {
    let mut tasks = Vec::with_capacity(items.len());
    let mut seen: HashSet<String> = HashSet::new();
    for item in items {
        match serde_json::from_value::<ParallelTask>(item.clone()) {
            Ok(mut task) => {
                if task.context.is_empty() {
                    task.context = state.to_context();
                    task.context.remove("state");
                }
                if seen.contains(&task.task_id) {
                    let unique = (2..)
                        .map(|n| format!("{}-{n}", task.task_id))
                        .find(|candidate| !seen.contains(candidate))
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    state.signals.record_observation(
                        format!("Renamed duplicate parallel task '{}' to '{unique}'", task.task_id),
                        item.clone(),
                    );
                    task.task_id = unique;
                }
                seen.insert(task.task_id.clone());
                tasks.push(task);
            }
            Err(err) => state
                .signals
                .record_observation(format!("Ignored malformed parallel task: {err}"), item.clone()),
        }
    }
    tasks
}
