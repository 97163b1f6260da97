//! Guard expression language.
//!
//! Guards, gate criteria, decision rules and constraint checks are written in
//! a small closed grammar: literals, names, attribute and index access,
//! arithmetic, comparisons (chained), membership, `and`/`or`/`not`, and a
//! fixed set of builtin functions ([`eval::ALLOWED_FUNCTIONS`]) plus a few
//! map/string methods (`get`, `keys`, `values`, `lower`, `upper`, `strip`,
//! `startswith`, `endswith`).
//!
//! Evaluation never touches anything outside the supplied environment map.
//! [`evaluate_condition`] is the total entry point used for routing: every
//! lexing, parsing or evaluation failure is logged and reads as `false`.

pub mod eval;
pub mod lexer;
pub mod parser;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::models::document::is_truthy;
pub use parser::Expr;

/// Errors raised while lexing, parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset}: {message}")]
    Lex { offset: usize, message: String },

    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("name '{0}' is not defined")]
    UnknownName(String),

    #[error("no attribute or key '{0}'")]
    UnknownAttribute(String),

    #[error("index {0} out of range")]
    IndexOutOfRange(i64),

    #[error("function '{0}' is not allowed")]
    UnknownFunction(String),

    #[error("method '{method}' is not supported on {receiver}")]
    UnknownMethod { method: String, receiver: &'static str },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// A parsed expression, ready to evaluate against many environments.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression from source text.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lexer::tokenize(source)?;
        let ast = parser::parse(&tokens, source.len())?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a value.
    pub fn evaluate(&self, env: &Map<String, Value>) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.ast, env)
    }

    /// Evaluate and apply truthiness.
    pub fn evaluate_bool(&self, env: &Map<String, Value>) -> Result<bool, ExpressionError> {
        self.evaluate(env).map(|value| is_truthy(&value))
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(source: &str, env: &Map<String, Value>) -> Result<Value, ExpressionError> {
    Expression::parse(source)?.evaluate(env)
}

/// Parse and evaluate as a boolean, surfacing errors to the caller.
pub fn try_condition(source: &str, env: &Map<String, Value>) -> Result<bool, ExpressionError> {
    Expression::parse(source)?.evaluate_bool(env)
}

/// Total boolean evaluation: any failure is logged and reads as `false`.
pub fn evaluate_condition(source: &str, env: &Map<String, Value>) -> bool {
    match try_condition(source, env) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(expression = %source, error = %err, "expression evaluation failed, treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_comparisons_and_booleans() {
        let env = env(json!({"data": {"score": 0.9, "status": "ready", "tags": ["a", "b"]}}));
        assert!(evaluate_condition("data.score > 0.8 and data.status == 'ready'", &env));
        assert!(evaluate_condition("'a' in data.tags", &env));
        assert!(evaluate_condition("'z' not in data.tags", &env));
        assert!(evaluate_condition("not data.score < 0.5", &env));
        assert!(evaluate_condition("0.5 < data.score <= 1", &env));
        assert!(!evaluate_condition("0.95 < data.score <= 1", &env));
    }

    #[test]
    fn test_integer_and_float_equality() {
        let env = env(json!({"count": 2}));
        assert!(evaluate_condition("count == 2.0", &env));
        assert_eq!(evaluate("count + 1", &env).unwrap(), json!(3));
        assert_eq!(evaluate("count / 4", &env).unwrap(), json!(0.5));
        assert_eq!(evaluate("-count", &env).unwrap(), json!(-2));
    }

    #[test]
    fn test_builtins() {
        let env = env(json!({"output": {"summary": "", "items": [3, 1, 2]}}));
        assert!(!evaluate_condition("len(output.summary) > 0", &env));
        assert_eq!(evaluate("max(output.items)", &env).unwrap(), json!(3));
        assert_eq!(evaluate("min(4, 2, 9)", &env).unwrap(), json!(2));
        assert_eq!(evaluate("sum(output.items)", &env).unwrap(), json!(6));
        assert_eq!(evaluate("round(2.5)", &env).unwrap(), json!(2));
        assert_eq!(evaluate("round(0.125, 2)", &env).unwrap(), json!(0.12));
        assert_eq!(evaluate("str(True)", &env).unwrap(), json!("True"));
        assert_eq!(evaluate("int('42') + float('0.5')", &env).unwrap(), json!(42.5));
        assert!(evaluate_condition("any([0, '', 1]) and not all([1, 0])", &env));
        assert!(evaluate_condition("abs(-3) == 3", &env));
    }

    #[test]
    fn test_every_allowed_function_is_callable() {
        let env = env(json!({}));
        for name in eval::ALLOWED_FUNCTIONS {
            let err = evaluate(&format!("{name}()"), &env).unwrap_err();
            assert!(
                !matches!(err, ExpressionError::UnknownFunction(_)),
                "{name} should be an allowed function"
            );
        }
    }

    #[test]
    fn test_map_get_and_string_methods() {
        let env = env(json!({"data": {"name": "Quarterly Report"}}));
        assert!(evaluate_condition("data.get('missing') is None", &env));
        assert_eq!(evaluate("data.get('missing', 5)", &env).unwrap(), json!(5));
        assert!(evaluate_condition("data.name.lower().startswith('quarterly')", &env));
        assert!(evaluate_condition("'name' in data.keys()", &env));
    }

    #[test]
    fn test_state_alias_style_paths() {
        let ctx = json!({"data": {"verification_passed": true}});
        let mut env = env(ctx.clone());
        env.insert("state".to_string(), ctx);
        assert!(evaluate_condition("state.data.verification_passed == True", &env));
        assert!(evaluate_condition("data.verification_passed", &env));
    }

    #[test]
    fn test_errors_read_as_false() {
        let env = env(json!({"data": {}}));
        assert!(!evaluate_condition("data.missing > 1", &env));
        assert!(!evaluate_condition("unknown_name", &env));
        assert!(!evaluate_condition("__import__('os')", &env));
        assert!(!evaluate_condition("1 / 0", &env));
        assert!(!evaluate_condition("None > 1", &env));
        assert!(!evaluate_condition("((", &env));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let env = env(json!({"data": {"x": i64::MIN}}));
        assert!(evaluate_condition("data.x % -1 == 0", &env));
        assert_eq!(evaluate("data.x % -1", &env).unwrap().as_f64(), Some(0.0));
        assert!(evaluate_condition("-data.x > 0", &env));
    }

    #[test]
    fn test_disallowed_functions_are_rejected() {
        let env = env(json!({}));
        assert_eq!(
            evaluate("open('x')", &env).unwrap_err(),
            ExpressionError::UnknownFunction("open".to_string())
        );
    }

    #[test]
    fn test_indexing() {
        let env = env(json!({"items": ["a", "b", "c"], "m": {"k": 1}}));
        assert_eq!(evaluate("items[-1]", &env).unwrap(), json!("c"));
        assert_eq!(evaluate("items.0", &env).unwrap(), json!("a"));
        assert_eq!(evaluate("m['k']", &env).unwrap(), json!(1));
        assert!(matches!(evaluate("items[5]", &env), Err(ExpressionError::IndexOutOfRange(5))));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        let env = env(json!({"flag": false}));
        assert!(!evaluate_condition("flag and missing.value", &env));
        assert!(evaluate_condition("not flag or missing.value", &env));
    }
}
