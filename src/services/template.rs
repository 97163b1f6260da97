//! `{{dot.path}}` rendering for node instructions and dredge queries.

use serde_json::{Map, Value};

use crate::domain::models::document::get_path;

/// Render a template against a context map.
///
/// Each `{{ path }}` is replaced by the value at that dot path: strings are
/// inserted as-is, other values as compact JSON. Placeholders that do not
/// resolve, and unterminated `{{`, are left verbatim.
pub fn render(template: &str, context: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let path = after_open[..end].trim();
        match lookup(context, path) {
            Some(value) => out.push_str(&display(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let (head, tail) = path.split_once('.').unwrap_or((path, ""));
    get_path(context.get(head)?, tail)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Map<String, Value> {
        match json!({
            "user_request": "summarize the report",
            "data": {"topic": "rust", "sources": [{"url": "a"}, {"url": "b"}], "count": 2},
            "dredged_memory": {"memory": "- Rust is fast"}
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_substitutes_paths() {
        let rendered = render("Task: {{user_request}} about {{ data.topic }} ({{data.count}})", &context());
        assert_eq!(rendered, "Task: summarize the report about rust (2)");
    }

    #[test]
    fn test_array_index_and_json_values() {
        assert_eq!(render("{{data.sources.1.url}}", &context()), "b");
        assert_eq!(render("{{data.sources.0}}", &context()), r#"{"url":"a"}"#);
    }

    #[test]
    fn test_unknown_placeholders_stay_verbatim() {
        assert_eq!(render("keep {{data.missing}} and {{nope}}", &context()), "keep {{data.missing}} and {{nope}}");
        assert_eq!(render("open {{data.topic", &context()), "open {{data.topic");
        assert_eq!(render("empty {{}}", &context()), "empty {{}}");
    }

    #[test]
    fn test_dredged_memory_is_reachable() {
        assert_eq!(render("Known:\n{{dredged_memory.memory}}", &context()), "Known:\n- Rust is fast");
    }
}
