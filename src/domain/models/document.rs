//! Dot-path access and deep-merge patching over the working-data tree.
//!
//! The working data of a run is a plain `serde_json::Value` tree. Paths are
//! dot-separated segments (`research.sources.0.url`); a segment that parses
//! as an integer indexes into arrays, anything else is an object key.

use serde_json::{Map, Value};

/// Look up the value at a dot-separated path.
///
/// An empty path returns the root itself.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write a value at a dot-separated path, creating intermediate maps.
///
/// Any non-map value sitting on the way to the target is replaced by a map,
/// except arrays, which are indexed when the segment is a valid position.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(root, &segments, value);
}

fn set_segments(current: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return;
    };

    if let Value::Array(items) = current {
        if let Some(slot) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            set_segments(slot, rest, value);
            return;
        }
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        let slot = map.entry((*head).to_string()).or_insert(Value::Null);
        set_segments(slot, rest, value);
    }
}

/// Deep-merge `patch` into `target`.
///
/// Maps merge key by key, recursively; every other value in the patch
/// replaces what was there.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => deep_merge(slot, value),
                    _ => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Truthiness used by guards, criteria and decision rules.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Short human-readable type name for error messages.
pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path_nested_and_indexed() {
        let doc = json!({"research": {"sources": [{"url": "a"}, {"url": "b"}]}});
        assert_eq!(get_path(&doc, "research.sources.1.url"), Some(&json!("b")));
        assert_eq!(get_path(&doc, "research.missing"), None);
        assert_eq!(get_path(&doc, "research.sources.9"), None);
        assert_eq!(get_path(&doc, ""), Some(&doc));
    }

    #[test]
    fn test_set_path_creates_intermediate_maps() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(3));
        assert_eq!(doc, json!({"a": {"b": {"c": 3}}}));

        set_path(&mut doc, "a.b", json!("flat"));
        assert_eq!(doc, json!({"a": {"b": "flat"}}));

        // A scalar on the way is replaced by a map
        set_path(&mut doc, "a.b.d", json!(true));
        assert_eq!(doc, json!({"a": {"b": {"d": true}}}));
    }

    #[test]
    fn test_set_path_into_array() {
        let mut doc = json!({"items": [1, 2, 3]});
        set_path(&mut doc, "items.1", json!(20));
        assert_eq!(doc, json!({"items": [1, 20, 3]}));
    }

    #[test]
    fn test_deep_merge_preserves_siblings() {
        let mut doc = json!({"gates": {"g1": {"passed": true}}, "count": 1});
        deep_merge(&mut doc, json!({"gates": {"g2": {"passed": false}}, "count": 2}));
        assert_eq!(
            doc,
            json!({"gates": {"g1": {"passed": true}, "g2": {"passed": false}}, "count": 2})
        );
    }

    #[test]
    fn test_deep_merge_replaces_non_maps() {
        let mut doc = json!({"list": [1, 2]});
        deep_merge(&mut doc, json!({"list": [3]}));
        assert_eq!(doc, json!({"list": [3]}));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!(0.1)));
        assert!(is_truthy(&json!({"a": 1})));
    }
}
