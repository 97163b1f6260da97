//! Guardrails layered over normal execution.
//!
//! All conditions are guard-language expressions evaluated against the run
//! context. Evaluation lives in the controller; this module only holds the
//! declarations.

use serde::{Deserialize, Serialize};

fn default_stop_action() -> String {
    "ask_user".to_string()
}

/// Halts the run and waits for a human when its condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRule {
    pub name: String,
    pub condition: String,
    #[serde(default = "default_stop_action")]
    pub action: String,
    #[serde(default)]
    pub reason: String,
}

impl StopRule {
    pub fn new(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
            action: default_stop_action(),
            reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Post-step check over the node output (`output.*`) and the run context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    /// Must evaluate truthy for the output to be valid.
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A failing fatal rule ends the run.
    #[serde(default)]
    pub fatal: bool,
}

impl ValidationRule {
    pub fn new(name: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check: check.into(),
            message: None,
            fatal: false,
        }
    }

    pub const fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn error_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("Validation rule '{}' failed: {}", self.name, self.check))
    }
}

fn default_true() -> bool {
    true
}

/// Numeric floor on a working-data field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimumEnforcement {
    /// Dot path into the working data.
    pub field: String,
    pub minimum: f64,
    /// Raise the value to the floor instead of failing the run.
    #[serde(default = "default_true")]
    pub auto_correct: bool,
    #[serde(default = "default_true")]
    pub log_correction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MinimumEnforcement {
    pub fn new(field: impl Into<String>, minimum: f64) -> Self {
        Self {
            field: field.into(),
            minimum,
            auto_correct: true,
            log_correction: true,
            message: None,
        }
    }

    pub const fn blocking(mut self) -> Self {
        self.auto_correct = false;
        self
    }
}

/// Every guardrail a controller enforces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub stop_rules: Vec<StopRule>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub minimums: Vec<MinimumEnforcement>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.stop_rules.is_empty() && self.validation_rules.is_empty() && self.minimums.is_empty()
    }

    pub fn with_stop_rule(mut self, rule: StopRule) -> Self {
        self.stop_rules.push(rule);
        self
    }

    pub fn with_validation_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn with_minimum(mut self, minimum: MinimumEnforcement) -> Self {
        self.minimums.push(minimum);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let constraints: Constraints = serde_yaml::from_str(
            r"
stop_rules:
  - name: missing_data
    condition: data.rows == 0
validation_rules:
  - name: has_summary
    check: len(output.summary) > 0
minimums:
  - field: staffing.agents
    minimum: 3
",
        )
        .unwrap();
        assert_eq!(constraints.stop_rules[0].action, "ask_user");
        assert!(!constraints.validation_rules[0].fatal);
        assert!(constraints.minimums[0].auto_correct);
        assert!(!constraints.is_empty());
    }

    #[test]
    fn test_default_error_message() {
        let rule = ValidationRule::new("has_summary", "len(output.summary) > 0");
        assert_eq!(rule.error_message(), "Validation rule 'has_summary' failed: len(output.summary) > 0");
    }
}
