//! Boolean trees of readiness expressions.
//!
//! A tree is written as JSON: a string is a single `jsonpath=` or
//! `condition=` expression, an array is the conjunction of its elements, and
//! an object `{"operator": "and" | "or", "conditions": [...]}` combines its
//! children explicitly. The operator defaults to `and`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use kawait_core::{Context, Event, Logger, ResourceSnapshot, Severity};
use kawait_jsonpath::JsonPath;

use crate::custom::{find_condition, ConditionState};
use crate::{parse_custom, stale_generation, status_observed_generation, ConditionError, ObjectObserver, Observer, Satisfier, Source, Visit};

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    JsonPath(JsonPath),
    Condition { kind: String, status: String },
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
}

impl ConditionExpr {
    /// Parse a single `jsonpath=` or `condition=` expression.
    pub fn parse_str(expr: &str) -> Result<Self, ConditionError> {
        if expr.starts_with("jsonpath=") {
            return Ok(ConditionExpr::JsonPath(kawait_jsonpath::parse(expr)?));
        }
        if expr.starts_with("condition=") {
            let (kind, status) = parse_custom(expr)?;
            return Ok(ConditionExpr::Condition { kind, status });
        }
        Err(ConditionError::invalid(expr, r#"expected a "jsonpath=" or "condition=" prefix"#))
    }

    pub fn parse(v: &Value) -> Result<Self, ConditionError> {
        match v {
            Value::String(s) => Self::parse_str(s),
            Value::Array(items) => Ok(ConditionExpr::And(parse_all(items)?)),
            Value::Object(map) => {
                let items = match map.get("conditions") {
                    Some(Value::Array(items)) => items,
                    _ => return Err(ConditionError::invalid(&v.to_string(), "\"conditions\" must be a list")),
                };
                let children = parse_all(items)?;
                match map.get("operator").map(|o| o.as_str()) {
                    None | Some(Some("and")) => Ok(ConditionExpr::And(children)),
                    Some(Some("or")) => Ok(ConditionExpr::Or(children)),
                    Some(op) => Err(ConditionError::invalid(
                        &v.to_string(),
                        format!("unknown operator {}", op.unwrap_or("<non-string>")),
                    )),
                }
            }
            other => Err(ConditionError::invalid(&other.to_string(), "a condition must be a string, list or object")),
        }
    }

    /// Evaluate against `obj`. Errors from any evaluated leaf propagate;
    /// `and`/`or` stop at the first deciding child.
    pub fn eval(&self, obj: &ResourceSnapshot) -> Result<bool, ConditionError> {
        match self {
            ConditionExpr::JsonPath(p) => Ok(p.matches(obj.value())?.matched),
            ConditionExpr::Condition { kind, status } => match find_condition(obj, kind) {
                ConditionState::Found(s) => Ok(s.eq_ignore_ascii_case(status)),
                _ => Ok(false),
            },
            ConditionExpr::And(children) => {
                for c in children {
                    if !c.eval(obj)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionExpr::Or(children) => {
                for c in children {
                    if c.eval(obj)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn parse_all(items: &[Value]) -> Result<Vec<ConditionExpr>, ConditionError> {
    if items.is_empty() {
        return Err(ConditionError::invalid("[]", "at least one condition must be specified"));
    }
    items.iter().map(ConditionExpr::parse).collect()
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[ConditionExpr], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", op)?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str(")")
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionExpr::JsonPath(p) => write!(f, "{}", p),
            ConditionExpr::Condition { kind, status } => write!(f, "condition={}={}", kind, status),
            ConditionExpr::And(c) => write_joined(f, c, "and"),
            ConditionExpr::Or(c) => write_joined(f, c, "or"),
        }
    }
}

/// Parse `tree` and evaluate it against `obj` in one go.
pub fn eval_condition(obj: &ResourceSnapshot, tree: &Value) -> Result<bool, ConditionError> {
    ConditionExpr::parse(tree)?.eval(obj)
}

/// Waits for a condition tree to hold on the tracked object.
pub struct Expression {
    observer: ObjectObserver,
    logger: Arc<dyn Logger>,
    expr: ConditionExpr,
}

impl Expression {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, logger: Arc<dyn Logger>, obj: ResourceSnapshot, expr: ConditionExpr) -> Self {
        Self { observer: ObjectObserver::new(ctx, source, obj), logger, expr }
    }
}

#[async_trait]
impl Observer for Expression {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }
    fn observe(&self, event: &Event) -> Result<(), ConditionError> { self.observer.observe(event) }
}

impl Satisfier for Expression {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        let obj = self.observer.object();
        if let Some(msg) = stale_generation(&obj, status_observed_generation(&obj)) {
            self.logger.log_status(Severity::Info, &msg);
            return Ok(false);
        }
        if self.expr.eval(&obj)? {
            return Ok(true);
        }
        self.logger.log_status(Severity::Info, &format!("Waiting for {}", self.expr));
        Ok(false)
    }

    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}
