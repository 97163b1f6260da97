//! Stop rules, validation rules and numeric minimums, checked after every
//! step.

use serde_json::{json, Value};
use tracing::{info, warn};

use super::{BrainController, Halt};
use crate::domain::errors::DomainError;
use crate::domain::expression;
use crate::domain::models::{AuditAction, Node, RunOutcome, RunState};

impl BrainController {
    /// Check every guardrail against the state after `node` ran. Returns the
    /// halt when one ends the run.
    pub(super) fn enforce_constraints(&self, node: &Node, state: &mut RunState) -> Option<Halt> {
        if self.constraints.is_empty() {
            return None;
        }
        self.check_stop_rules(node, state)
            .or_else(|| self.check_validation_rules(node, state))
            .or_else(|| self.enforce_minimums(node, state))
    }

    fn check_stop_rules(&self, node: &Node, state: &mut RunState) -> Option<Halt> {
        let context = state.to_context();
        let rule = self
            .constraints
            .stop_rules
            .iter()
            .find(|rule| expression::evaluate_condition(&rule.condition, &context))?;

        info!(run_id = %state.run_id, node_id = %node.id, rule = %rule.name, "stop rule triggered");
        state.signals.record_observation(
            format!("Stop rule triggered: {}", rule.condition),
            json!({"rule": rule.name, "node_id": node.id}),
        );
        state.record_audit(
            &node.id,
            AuditAction::StopRuleTriggered,
            json!({"rule": rule.name, "condition": rule.condition, "action": rule.action}),
        );
        state.set(
            "pending_human_input",
            json!({"rule": rule.name, "reason": rule.reason, "action": rule.action}),
        );

        let error = DomainError::StopRuleTriggered {
            rule: rule.name.clone(),
            reason: rule.reason.clone(),
        };
        Some((RunOutcome::Escalated, Some(error.to_string())))
    }

    fn check_validation_rules(&self, node: &Node, state: &mut RunState) -> Option<Halt> {
        let context = state.to_context();
        for rule in &self.constraints.validation_rules {
            let failure = match expression::try_condition(&rule.check, &context) {
                Ok(true) => continue,
                Ok(false) => rule.error_message(),
                Err(err) => format!("{} ({err})", rule.error_message()),
            };

            warn!(run_id = %state.run_id, node_id = %node.id, rule = %rule.name, fatal = rule.fatal, "validation failed");
            state.signals.record_failure(
                &node.id,
                format!("Validation failed: {}", rule.name),
                json!({"check": rule.check, "message": failure}),
            );
            state.record_audit(
                &node.id,
                AuditAction::ValidationFailed,
                json!({"rule": rule.name, "message": failure, "fatal": rule.fatal}),
            );

            if rule.fatal {
                let error = DomainError::ValidationFailed(failure);
                return Some((RunOutcome::Failure, Some(error.to_string())));
            }
        }
        None
    }

    fn enforce_minimums(&self, node: &Node, state: &mut RunState) -> Option<Halt> {
        let mut corrections = Vec::new();

        for minimum in &self.constraints.minimums {
            let Some(current) = state.get(&minimum.field).and_then(Value::as_f64) else {
                continue;
            };
            if current >= minimum.minimum {
                continue;
            }

            if !minimum.auto_correct {
                let message = minimum
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} is {current}, below minimum {}", minimum.field, minimum.minimum));
                warn!(run_id = %state.run_id, field = %minimum.field, current, minimum = minimum.minimum, "value below minimum");
                state.signals.record_failure(
                    &node.id,
                    format!("Value below minimum: {}", minimum.field),
                    json!({"current": current, "minimum": minimum.minimum}),
                );
                return Some((RunOutcome::Failure, Some(DomainError::ValidationFailed(message).to_string())));
            }

            state.set(&minimum.field, json!(minimum.minimum));
            if minimum.log_correction {
                state.signals.record_observation(
                    format!("Auto-corrected {} from {current} to {}", minimum.field, minimum.minimum),
                    json!({"field": minimum.field, "from": current, "to": minimum.minimum}),
                );
            }
            corrections.push(json!({"field": minimum.field, "from": current, "to": minimum.minimum}));
        }

        if !corrections.is_empty() {
            info!(run_id = %state.run_id, node_id = %node.id, corrections = corrections.len(), "minimums enforced");
            state.record_audit(&node.id, AuditAction::MinimumEnforcement, json!({"corrections": corrections}));
        }
        None
    }
}
