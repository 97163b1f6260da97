//! Tree-walking interpreter with a closed set of builtins.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::parser::{BinaryOp, CompareOp, Expr};
use super::ExpressionError;
use crate::domain::models::document::{is_truthy, type_name};

/// Functions callable from expressions. Anything else is rejected.
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "len", "any", "all", "min", "max", "sum", "abs", "round", "str", "int", "float", "bool",
];

type EvalResult = Result<Value, ExpressionError>;

/// Evaluate an expression tree against a variable environment.
pub fn evaluate(expr: &Expr, env: &Map<String, Value>) -> EvalResult {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownName(name.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Attribute(target, name) => attribute(&evaluate(target, env)?, name),
        Expr::Index(target, index) => subscript(&evaluate(target, env)?, &evaluate(index, env)?),
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(function, &args)
        }
        Expr::MethodCall { receiver, method, args } => {
            let receiver = evaluate(receiver, env)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(&receiver, method, &args)
        }
        Expr::Negate(inner) => match evaluate(inner, env)? {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(i.checked_neg().map_or_else(|| float(-(i as f64)), Value::from)),
                None => Ok(float(-n.as_f64().unwrap_or_default())),
            },
            other => Err(ExpressionError::Type(format!(
                "cannot negate {}",
                type_name(&other)
            ))),
        },
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, env)?))),
        Expr::And(left, right) => {
            let left = evaluate(left, env)?;
            if is_truthy(&left) {
                evaluate(right, env)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, env)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(right, env)
            }
        }
        Expr::Binary(op, left, right) => binary(*op, &evaluate(left, env)?, &evaluate(right, env)?),
        Expr::Compare { first, rest } => {
            let mut left = evaluate(first, env)?;
            for (op, right_expr) in rest {
                let right = evaluate(right_expr, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn float(f: f64) -> Value {
    Value::from(f)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn attribute(target: &Value, name: &str) -> EvalResult {
    match target {
        Value::Object(map) => map
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownAttribute(name.to_string())),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownAttribute(name.to_string())),
        other => Err(ExpressionError::Type(format!(
            "{} has no attribute '{name}'",
            type_name(other)
        ))),
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    usize::try_from(resolved).ok().filter(|i| (*i as i64) < len)
}

fn subscript(target: &Value, index: &Value) -> EvalResult {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownAttribute(key.clone())),
        (Value::Array(items), index) => {
            let i = as_integer(index).ok_or_else(|| {
                ExpressionError::Type(format!("list index must be an integer, not {}", type_name(index)))
            })?;
            resolve_index(i, items.len())
                .and_then(|pos| items.get(pos))
                .cloned()
                .ok_or(ExpressionError::IndexOutOfRange(i))
        }
        (Value::String(s), index) => {
            let i = as_integer(index).ok_or_else(|| {
                ExpressionError::Type(format!("string index must be an integer, not {}", type_name(index)))
            })?;
            let chars: Vec<char> = s.chars().collect();
            resolve_index(i, chars.len())
                .map(|pos| Value::String(chars[pos].to_string()))
                .ok_or(ExpressionError::IndexOutOfRange(i))
        }
        (other, _) => Err(ExpressionError::Type(format!(
            "{} is not subscriptable",
            type_name(other)
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
    match (op, left, right) {
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (BinaryOp::Add, Value::Array(a), Value::Array(b)) => {
            Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => {
            let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
                return Err(ExpressionError::Type(format!(
                    "unsupported operand types {} and {}",
                    type_name(left),
                    type_name(right)
                )));
            };
            let ints = as_integer(left).zip(as_integer(right));
            match op {
                BinaryOp::Add => Ok(ints
                    .and_then(|(x, y)| x.checked_add(y))
                    .map_or_else(|| float(a + b), Value::from)),
                BinaryOp::Sub => Ok(ints
                    .and_then(|(x, y)| x.checked_sub(y))
                    .map_or_else(|| float(a - b), Value::from)),
                BinaryOp::Mul => Ok(ints
                    .and_then(|(x, y)| x.checked_mul(y))
                    .map_or_else(|| float(a * b), Value::from)),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(ExpressionError::DivisionByZero)
                    } else {
                        Ok(float(a / b))
                    }
                }
                BinaryOp::Rem => {
                    if b == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    Ok(ints
                        .and_then(|(x, y)| x.checked_rem_euclid(y))
                        .map_or_else(|| float(a.rem_euclid(b)), Value::from))
                }
            }
        }
    }
}

/// Equality with numeric coercion, so `1 == 1.0`.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => as_number(left) == as_number(right),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loosely_equal(x, y))
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| ExpressionError::Type("cannot order NaN".to_string())),
            _ => Err(ExpressionError::Type(format!(
                "cannot order {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExpressionError> {
    match (container, item) {
        (Value::Array(items), _) => Ok(items.iter().any(|candidate| loosely_equal(candidate, item))),
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(ExpressionError::Type(format!(
            "cannot test membership of {} in {}",
            type_name(item),
            type_name(container)
        ))),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => Ok(loosely_equal(left, right)),
        CompareOp::NotEq => Ok(!loosely_equal(left, right)),
        CompareOp::Lt => Ok(order(left, right)? == Ordering::Less),
        CompareOp::LtEq => Ok(order(left, right)? != Ordering::Greater),
        CompareOp::Gt => Ok(order(left, right)? == Ordering::Greater),
        CompareOp::GtEq => Ok(order(left, right)? != Ordering::Less),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => contains(right, left).map(|found| !found),
        CompareOp::Is => Ok(left == right),
        CompareOp::IsNot => Ok(left != right),
    }
}

/// Python-style rendering used by `str()`.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExpressionError> {
    if args.len() < min || args.len() > max {
        return Err(ExpressionError::Type(format!(
            "{name}() takes {min} to {max} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn iterable<'v>(name: &str, value: &'v Value) -> Result<&'v [Value], ExpressionError> {
    match value {
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(ExpressionError::Type(format!(
            "{name}() expects a list, got {}",
            type_name(other)
        ))),
    }
}

fn extreme(name: &str, args: &[Value], wanted: Ordering) -> EvalResult {
    let candidates: &[Value] = if args.len() == 1 { iterable(name, &args[0])? } else { args };
    let mut best: Option<&Value> = None;
    for candidate in candidates {
        best = match best {
            Some(current) if order(candidate, current)? != wanted => Some(current),
            _ => Some(candidate),
        };
    }
    best.cloned()
        .ok_or_else(|| ExpressionError::Type(format!("{name}() arg is an empty sequence")))
}

fn call_builtin(function: &str, args: &[Value]) -> EvalResult {
    match function {
        "len" => {
            expect_args(function, args, 1, 1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(ExpressionError::Type(format!(
                        "object of type {} has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(len))
        }
        "any" => {
            expect_args(function, args, 1, 1)?;
            Ok(Value::Bool(iterable(function, &args[0])?.iter().any(is_truthy)))
        }
        "all" => {
            expect_args(function, args, 1, 1)?;
            Ok(Value::Bool(iterable(function, &args[0])?.iter().all(is_truthy)))
        }
        "min" => {
            expect_args(function, args, 1, usize::MAX)?;
            extreme(function, args, Ordering::Less)
        }
        "max" => {
            expect_args(function, args, 1, usize::MAX)?;
            extreme(function, args, Ordering::Greater)
        }
        "sum" => {
            expect_args(function, args, 1, 2)?;
            let start = args.get(1).cloned().unwrap_or_else(|| Value::from(0));
            iterable(function, &args[0])?
                .iter()
                .try_fold(start, |acc, item| binary(BinaryOp::Add, &acc, item))
        }
        "abs" => {
            expect_args(function, args, 1, 1)?;
            match (as_integer(&args[0]), as_number(&args[0])) {
                (Some(i), _) => Ok(i.checked_abs().map_or_else(|| float((i as f64).abs()), Value::from)),
                (None, Some(f)) => Ok(float(f.abs())),
                _ => Err(ExpressionError::Type(format!(
                    "bad operand type for abs(): {}",
                    type_name(&args[0])
                ))),
            }
        }
        "round" => {
            expect_args(function, args, 1, 2)?;
            let value = as_number(&args[0]).ok_or_else(|| {
                ExpressionError::Type(format!("round() expects a number, got {}", type_name(&args[0])))
            })?;
            match args.get(1) {
                None => Ok(Value::from(value.round_ties_even() as i64)),
                Some(digits) => {
                    let digits = as_integer(digits).ok_or_else(|| {
                        ExpressionError::Type("round() digits must be an integer".to_string())
                    })?;
                    let factor = 10f64.powi(i32::try_from(digits).unwrap_or(0));
                    Ok(float((value * factor).round_ties_even() / factor))
                }
            }
        }
        "str" => {
            expect_args(function, args, 1, 1)?;
            Ok(Value::String(display(&args[0])))
        }
        "int" => {
            expect_args(function, args, 1, 1)?;
            match &args[0] {
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
                    ExpressionError::Type(format!("invalid literal for int(): '{s}'"))
                }),
                other => as_integer(other)
                    .or_else(|| as_number(other).map(|f| f.trunc() as i64))
                    .map(Value::from)
                    .ok_or_else(|| {
                        ExpressionError::Type(format!("int() cannot convert {}", type_name(other)))
                    }),
            }
        }
        "float" => {
            expect_args(function, args, 1, 1)?;
            match &args[0] {
                Value::String(s) => s.trim().parse::<f64>().map(float).map_err(|_| {
                    ExpressionError::Type(format!("could not convert string to float: '{s}'"))
                }),
                other => as_number(other).map(float).ok_or_else(|| {
                    ExpressionError::Type(format!("float() cannot convert {}", type_name(other)))
                }),
            }
        }
        "bool" => {
            expect_args(function, args, 1, 1)?;
            Ok(Value::Bool(is_truthy(&args[0])))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> EvalResult {
    match (receiver, method) {
        (Value::Object(map), "get") => {
            expect_args(method, args, 1, 2)?;
            let key = match &args[0] {
                Value::String(key) => key.as_str(),
                other => {
                    return Err(ExpressionError::Type(format!(
                        "map keys are strings, got {}",
                        type_name(other)
                    )))
                }
            };
            Ok(map
                .get(key)
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), "keys") => {
            expect_args(method, args, 0, 0)?;
            Ok(Value::Array(map.keys().cloned().map(Value::String).collect()))
        }
        (Value::Object(map), "values") => {
            expect_args(method, args, 0, 0)?;
            Ok(Value::Array(map.values().cloned().collect()))
        }
        (Value::String(s), "lower") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "upper") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "strip") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "startswith" | "endswith") => {
            expect_args(method, args, 1, 1)?;
            let Value::String(affix) = &args[0] else {
                return Err(ExpressionError::Type(format!("{method}() expects a string")));
            };
            Ok(Value::Bool(if method == "startswith" {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            }))
        }
        (other, _) => Err(ExpressionError::UnknownMethod {
            method: method.to_string(),
            receiver: type_name(other),
        }),
    }
}
