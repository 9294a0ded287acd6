use std::collections::BTreeMap;

use serde_json::Value;

/// Render a value for `-var key=<value>`.
///
/// Top-level strings are passed through bare. Lists and maps use the native
/// flat syntax (`["a","b"]`, `{k="v"}`) with strings quoted inside them.
pub fn render_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => render_nested(other),
    }
}

fn render_nested(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_nested).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}={}", render_key(k), render_nested(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn render_key(key: &str) -> String {
    let bare = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        quote(key)
    }
}

/// `-var` flags for every entry, in key order.
pub fn var_flags(vars: &BTreeMap<String, Value>) -> Vec<String> {
    vars.iter()
        .flat_map(|(k, v)| ["-var".to_string(), format!("{}={}", k, render_var(v))])
        .collect()
}

/// Render a backend config value for `-backend-config=key=value`.
pub fn render_backend_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => render_nested(other),
    }
}
