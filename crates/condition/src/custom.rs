use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use kawait_core::{Context, Event, Logger, ResourceSnapshot, Severity};

use crate::{stale_generation, status_observed_generation, ConditionError, ObjectObserver, Observer, Satisfier, Source, Visit};

const PREFIX: &str = "condition=";

/// Split `[condition=]Type[=Status]` into its type and expected status.
/// The status defaults to `True`.
pub fn parse_custom(expr: &str) -> Result<(String, String), ConditionError> {
    let body = expr.strip_prefix(PREFIX).unwrap_or(expr);
    let mut parts = body.splitn(2, '=');
    let kind = parts.next().unwrap_or_default().trim();
    if kind.is_empty() {
        return Err(ConditionError::invalid(expr, "a condition type is required"));
    }
    let status = match parts.next() {
        Some(s) if s.trim().is_empty() => return Err(ConditionError::invalid(expr, "condition status must be non-empty")),
        Some(s) if s.contains('=') => return Err(ConditionError::invalid(expr, "expected condition=Type[=Status]")),
        Some(s) => s.trim(),
        None => "True",
    };
    Ok((kind.to_string(), status.to_string()))
}

/// Outcome of looking for one condition type on an object.
pub(crate) enum ConditionState<'a> {
    /// `.status.conditions` is absent or not a list.
    NoConditions,
    Missing,
    Stale(String),
    Found(&'a str),
}

/// Locate condition `kind` (case-insensitively) and apply the
/// observed-generation freshness rule to it.
pub(crate) fn find_condition<'a>(obj: &'a ResourceSnapshot, kind: &str) -> ConditionState<'a> {
    let Some(conditions) = obj.get(&["status", "conditions"]).and_then(Value::as_array) else {
        return ConditionState::NoConditions;
    };
    let Some(cond) = conditions
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str).is_some_and(|t| t.eq_ignore_ascii_case(kind)))
    else {
        return ConditionState::Missing;
    };
    let observed = [cond.get("observedGeneration").and_then(Value::as_i64), status_observed_generation(obj)];
    if let Some(msg) = observed.into_iter().find_map(|o| stale_generation(obj, o)) {
        return ConditionState::Stale(msg);
    }
    ConditionState::Found(cond.get("status").and_then(Value::as_str).unwrap_or(""))
}

/// Waits for a status condition to reach a given status.
pub struct Custom {
    observer: ObjectObserver,
    logger: Arc<dyn Logger>,
    kind: String,
    status: String,
}

impl Custom {
    pub fn new(
        ctx: &Context,
        source: Arc<dyn Source>,
        logger: Arc<dyn Logger>,
        obj: ResourceSnapshot,
        expr: &str,
    ) -> Result<Self, ConditionError> {
        let (kind, status) = parse_custom(expr)?;
        Ok(Self { observer: ObjectObserver::new(ctx, source, obj), logger, kind, status })
    }

    pub fn expected(&self) -> (&str, &str) { (&self.kind, &self.status) }
}

#[async_trait]
impl Observer for Custom {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }
    fn observe(&self, event: &Event) -> Result<(), ConditionError> { self.observer.observe(event) }
}

impl Satisfier for Custom {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        let obj = self.observer.object();
        let msg = match find_condition(&obj, &self.kind) {
            ConditionState::Found(status) if status.eq_ignore_ascii_case(&self.status) => return Ok(true),
            ConditionState::Found(status) => {
                format!("Resource has condition {}={} (want {})", self.kind, status, self.status)
            }
            ConditionState::Stale(msg) => msg,
            ConditionState::Missing => format!("Waiting for condition {}", self.kind),
            ConditionState::NoConditions => "Missing .status.conditions".to_string(),
        };
        self.logger.log_status(Severity::Info, &msg);
        Ok(false)
    }

    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}
