// Variable Interpolation - {{path}} substitution for action parameters
//
// Paths use dot and bracket notation (`user.email`, `items[0].sku`, `items.0.sku`).
// A path that does not resolve is substituted with an empty string.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split a field path into key/index segments. Returns `None` for malformed paths.
fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        let (head, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if !head.is_empty() {
            segments.push(PathSegment::Key(head));
        } else if rest.is_empty() {
            // Empty segment, e.g. "user..email"
            return None;
        }

        while !rest.is_empty() {
            let close = rest.find(']')?;
            let inner = rest[1..close].trim();
            let inner = inner.trim_matches(|c| c == '"' || c == '\'');
            match inner.parse::<usize>() {
                Ok(index) => segments.push(PathSegment::Index(index)),
                Err(_) if !inner.is_empty() => segments.push(PathSegment::Key(inner)),
                Err(_) => return None,
            }
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }

    Some(segments)
}

/// Resolve `path` against `root`. `None` means the value is absent.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for segment in parse_path(path)? {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(index)?,
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }

    Some(current)
}

/// String form used when a value is substituted into a template
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Replace every `{{path}}` in `template` with the value at `path` in `context`
pub fn interpolate(template: &str, context: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            resolve_path(context, &caps[1])
                .map(value_to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Interpolate every string inside `value`, recursing through objects and arrays.
/// Object keys are left untouched.
pub fn interpolate_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}
