//! `jsonpath=` readiness expressions.
//!
//! An expression has the shape `jsonpath={.path}` (existence check) or
//! `jsonpath={.path}=value` (equality check), using the same strict syntax as
//! `kubectl get -o jsonpath`. Only the subset needed for readiness checks is
//! supported: field access, quoted keys, indices, wildcards, recursive
//! descent and single-comparison filters.

#![forbid(unsafe_code)]

mod path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use path::Segment;

const PREFIX: &str = "jsonpath=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonPathError {
    #[error("expression must be non-empty")]
    Empty,
    #[error("expected a \"jsonpath=\" prefix, got {0:?}")]
    MissingPrefix(String),
    #[error("omit shell quotes around the path: {0:?}")]
    Quoted(String),
    #[error("{0}= requires a value")]
    MissingValue(String),
    #[error("format should be {{.path}}=value or {{.path}}, got {0:?}")]
    Format(String),
    #[error("unrecognized character {ch:?} at position {pos} in {path}")]
    Unrecognized { path: String, pos: usize, ch: char },
    #[error("invalid path {path}: {reason}")]
    Syntax { path: String, reason: String },
    #[error("{path} has a non-primitive value ({found})")]
    NonPrimitive { path: String, found: String },
}

/// A parsed `jsonpath=` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    /// The brace-delimited path, exactly as written.
    pub path: String,
    /// Expected value; `None` for a pure existence check.
    pub value: Option<String>,
    segments: Vec<Segment>,
}

/// Outcome of evaluating a [`JsonPath`] against an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// String form of the value that was found; compact JSON for containers.
    pub found: String,
    pub message: String,
}

/// Parse a `jsonpath={.path}[=value]` expression.
pub fn parse(expr: &str) -> Result<JsonPath, JsonPathError> {
    if expr.is_empty() {
        return Err(JsonPathError::Empty);
    }
    let rest = expr.strip_prefix(PREFIX).ok_or_else(|| JsonPathError::MissingPrefix(expr.to_string()))?;
    if rest.starts_with('\'') || rest.starts_with('"') {
        return Err(JsonPathError::Quoted(rest.to_string()));
    }
    let close = rest.rfind('}').ok_or_else(|| JsonPathError::Format(rest.to_string()))?;
    let (path, tail) = rest.split_at(close + 1);
    if !path.trim_start().starts_with('{') {
        return Err(JsonPathError::Format(rest.to_string()));
    }
    let value = if tail.is_empty() {
        None
    } else {
        let v = tail.strip_prefix('=').ok_or_else(|| JsonPathError::Format(rest.to_string()))?;
        if v.is_empty() {
            return Err(JsonPathError::MissingValue(path.to_string()));
        }
        if v.contains('=') {
            return Err(JsonPathError::Format(rest.to_string()));
        }
        Some(v.to_string())
    };
    let segments = path::compile(path)?;
    Ok(JsonPath { path: path.to_string(), value, segments })
}

impl std::str::FromStr for JsonPath {
    type Err = JsonPathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { parse(s) }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}{}={}", PREFIX, self.path, v),
            None => write!(f, "{}{}", PREFIX, self.path),
        }
    }
}

impl JsonPath {
    pub fn segments(&self) -> &[Segment] { &self.segments }

    /// All values the path resolves to. Missing keys are skipped rather than
    /// reported, so an empty result means "missing".
    pub fn evaluate<'a>(&self, obj: &'a Value) -> Vec<&'a Value> { path::evaluate(&self.segments, obj) }

    pub fn matches(&self, obj: &Value) -> Result<MatchResult, JsonPathError> {
        let results = self.evaluate(obj);
        let Some(first) = results.first() else {
            return Ok(MatchResult { matched: false, found: String::new(), message: format!("Missing {}", self.path) });
        };

        let Some(want) = &self.value else {
            return Ok(MatchResult { matched: true, found: render(first).unwrap_or_else(|| first.to_string()), message: String::new() });
        };

        let mut found = Vec::with_capacity(results.len());
        for v in &results {
            match render(v) {
                Some(s) => found.push(s),
                None => {
                    return Err(JsonPathError::NonPrimitive { path: self.path.clone(), found: v.to_string() });
                }
            }
        }
        match found.iter().find(|s| *s == want) {
            Some(hit) => Ok(MatchResult { matched: true, found: hit.clone(), message: String::new() }),
            None => Ok(MatchResult { matched: false, found: found.swap_remove(0), message: String::new() }),
        }
    }
}

/// String form of a primitive value; `None` for maps and lists.
pub fn render(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_descriptive() {
        let cases = [
            ("", "non-empty"),
            ("{.foo}", "jsonpath="),
            ("jsonpath='{.status.phase}'=Running", "omit shell quotes"),
            ("jsonpath={.metadata.name}=", "{.metadata.name}= requires a value"),
            ("jsonpath={.metadata.name}='test=wrong'", "format should be {.path}=value or {.path}"),
            (r#"jsonpath={.status.conditions[?(@.type=="Failed"||@.type=="Complete")].status}=True"#, "unrecognized character"),
        ];
        for (expr, want) in cases {
            let err = parse(expr).unwrap_err().to_string();
            assert!(err.contains(want), "expr={} err={}", expr, err);
        }
    }

    #[test]
    fn parse_keeps_path_and_value() {
        let p = parse("jsonpath={.foo}").expect("ok");
        assert_eq!(p.path, "{.foo}");
        assert_eq!(p.value, None);

        let p = parse("jsonpath={.foo}=bar").expect("ok");
        assert_eq!(p.path, "{.foo}");
        assert_eq!(p.value.as_deref(), Some("bar"));

        let p = parse(r#"jsonpath={.status.containerStatuses[?(@.name=="foobar")].ready}=True"#).expect("ok");
        assert_eq!(p.path, r#"{.status.containerStatuses[?(@.name=="foobar")].ready}"#);
        assert_eq!(p.value.as_deref(), Some("True"));

        let p = parse("jsonpath={ .webhooks[].clientConfig.caBundle }").expect("ok");
        assert_eq!(p.path, "{ .webhooks[].clientConfig.caBundle }");
        assert_eq!(p.to_string(), "jsonpath={ .webhooks[].clientConfig.caBundle }");
    }
}
