//! Per-object await behaviour driven by annotations.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use kawait_core::{Context, Gvk, Logger, ObjectGetter, ResourceSnapshot};

use crate::{
    All, ConditionError, ConditionExpr, Custom, Deleted, Expression, Immediate, JsonPathCondition, Ready, Satisfier, Source,
};

pub const ANNOTATION_SKIP_AWAIT: &str = "kawait.io/skipAwait";
pub const ANNOTATION_WAIT_FOR: &str = "kawait.io/waitFor";
pub const ANNOTATION_TIMEOUT_SECONDS: &str = "kawait.io/timeoutSeconds";

/// Kinds whose historical delete path honoured `skipAwait`.
const LEGACY_SKIP_DELETE: &[(&str, &str)] = &[
    ("", "Namespace"),
    ("", "Pod"),
    ("", "ReplicationController"),
    ("apps", "DaemonSet"),
    ("apps", "Deployment"),
    ("apps", "StatefulSet"),
    ("batch", "Job"),
];

fn is_annotation_true(obj: &ResourceSnapshot, key: &str) -> bool {
    obj.annotation(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

pub fn skip_await(obj: &ResourceSnapshot) -> bool { is_annotation_true(obj, ANNOTATION_SKIP_AWAIT) }

/// Timeout requested through the annotation; `None` when unset or not an
/// integer.
pub fn timeout(obj: &ResourceSnapshot) -> Option<Duration> {
    obj.annotation(ANNOTATION_TIMEOUT_SECONDS)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn allows_skip_await_with_delete(gvk: &Gvk) -> bool {
    // Every beta apps group version is accepted alongside apps/v1.
    LEGACY_SKIP_DELETE.iter().any(|(g, k)| gvk.group == *g && gvk.kind == *k)
}

/// Build the satisfier for a single `jsonpath=` or `condition=` expression.
pub fn condition_for_expr(
    ctx: &Context,
    source: Arc<dyn Source>,
    logger: Arc<dyn Logger>,
    obj: &ResourceSnapshot,
    expr: &str,
) -> Result<Arc<dyn Satisfier>, ConditionError> {
    if expr.starts_with("jsonpath=") {
        let jsp = kawait_jsonpath::parse(expr)?;
        return Ok(Arc::new(JsonPathCondition::new(ctx, source, logger, obj.clone(), jsp)));
    }
    if expr.starts_with("condition=") {
        return Ok(Arc::new(Custom::new(ctx, source, logger, obj.clone(), expr)?));
    }
    Err(ConditionError::invalid(expr, r#"expected a "jsonpath=" or "condition=" prefix"#))
}

/// Satisfier for creates and updates.
///
/// `inputs` carries the user's annotations; `obj` is the live object the
/// condition tracks.
///
/// - `skipAwait=true` never waits.
/// - `waitFor` holds one expression, a JSON list of expressions (all must
///   hold) or a JSON condition tree.
/// - Without `waitFor`, `await_all` selects generic readiness; otherwise
///   nothing is awaited.
pub fn ready_condition(
    ctx: &Context,
    source: Arc<dyn Source>,
    logger: Arc<dyn Logger>,
    inputs: &ResourceSnapshot,
    obj: &ResourceSnapshot,
    await_all: bool,
) -> Result<Arc<dyn Satisfier>, ConditionError> {
    if skip_await(inputs) {
        return Ok(Arc::new(Immediate::new(Some(logger), obj.clone())));
    }

    let Some(val) = obj.annotation(ANNOTATION_WAIT_FOR).filter(|v| !v.is_empty()) else {
        if await_all {
            return Ok(Arc::new(Ready::new(ctx, source, logger, obj.clone())));
        }
        return Ok(Arc::new(Immediate::new(None, obj.clone())));
    };

    let exprs: Vec<String> = match serde_json::from_str::<Value>(val) {
        Ok(Value::Array(items)) if items.iter().all(Value::is_string) => {
            items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        Ok(tree @ (Value::Array(_) | Value::Object(_))) => {
            let expr = ConditionExpr::parse(&tree)?;
            return Ok(Arc::new(Expression::new(ctx, source, logger, obj.clone(), expr)));
        }
        Ok(Value::String(s)) => vec![s],
        _ => vec![val.to_string()],
    };
    if exprs.is_empty() {
        return Err(ConditionError::invalid(val, "at least one condition must be specified"));
    }

    let mut conditions = exprs
        .iter()
        .map(|expr| condition_for_expr(ctx, source.clone(), logger.clone(), obj, expr))
        .collect::<Result<Vec<_>, _>>()?;
    if conditions.len() == 1 {
        if let Some(only) = conditions.pop() {
            return Ok(only);
        }
    }
    Ok(Arc::new(All::new(conditions)?))
}

/// Satisfier for deletes. `skipAwait` is only honoured for the legacy kinds
/// that always supported it.
pub fn deleted_condition(
    ctx: &Context,
    source: Arc<dyn Source>,
    getter: Arc<dyn ObjectGetter>,
    logger: Arc<dyn Logger>,
    inputs: &ResourceSnapshot,
    obj: &ResourceSnapshot,
) -> Arc<dyn Satisfier> {
    if skip_await(inputs) && allows_skip_await_with_delete(&inputs.gvk()) {
        return Arc::new(Immediate::new(Some(logger), obj.clone()));
    }
    Arc::new(Deleted::new(ctx, source, getter, logger, obj.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Static;
    use kawait_core::{GetError, MemoryLogger};
    use serde_json::json;

    struct NoGet;
    #[async_trait::async_trait]
    impl ObjectGetter for NoGet {
        async fn get(&self, _ctx: &Context, name: &str) -> Result<ResourceSnapshot, GetError> {
            Err(GetError::NotFound(name.to_string()))
        }
    }

    fn annotated(api_version: &str, kind: &str, annotations: Value) -> ResourceSnapshot {
        ResourceSnapshot::new(json!({
            "apiVersion": api_version, "kind": kind,
            "metadata": {"name": "foo", "annotations": annotations},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "False"}]}
        }))
    }

    fn ready(obj: &ResourceSnapshot, await_all: bool) -> Result<Arc<dyn Satisfier>, ConditionError> {
        ready_condition(&Context::background(), Arc::new(Static::idle()), Arc::new(MemoryLogger::new()), obj, obj, await_all)
    }

    #[test]
    fn skip_and_default_behaviour() {
        let obj = annotated("v1", "Pod", json!({ANNOTATION_SKIP_AWAIT: "true"}));
        assert!(ready(&obj, true).expect("ok").satisfied().expect("ok"));

        let obj = annotated("v1", "Pod", json!({}));
        assert!(ready(&obj, false).expect("ok").satisfied().expect("ok"));
        assert!(!ready(&obj, true).expect("ok").satisfied().expect("ok"));
    }

    #[test]
    fn wait_for_forms() {
        let single = annotated("v1", "Pod", json!({ANNOTATION_WAIT_FOR: "jsonpath={.status.phase}=Running"}));
        assert!(ready(&single, false).expect("ok").satisfied().expect("ok"));

        let list = annotated(
            "v1",
            "Pod",
            json!({ANNOTATION_WAIT_FOR: r#"["jsonpath={.status.phase}=Running", "condition=Ready"]"#}),
        );
        assert!(!ready(&list, false).expect("ok").satisfied().expect("ok"));

        let tree = annotated(
            "v1",
            "Pod",
            json!({ANNOTATION_WAIT_FOR: r#"{"operator": "or", "conditions": ["condition=Ready", "jsonpath={.status.phase}=Running"]}"#}),
        );
        assert!(ready(&tree, false).expect("ok").satisfied().expect("ok"));
    }

    #[test]
    fn wait_for_errors() {
        let empty = annotated("v1", "Pod", json!({ANNOTATION_WAIT_FOR: "[]"}));
        assert!(ready(&empty, false).is_err());
        let unknown = annotated("v1", "Pod", json!({ANNOTATION_WAIT_FOR: "ready"}));
        let err = ready(&unknown, false).err().expect("error");
        assert!(err.to_string().contains("prefix"), "{}", err);
    }

    #[test]
    fn timeout_annotation() {
        assert_eq!(timeout(&annotated("v1", "Pod", json!({ANNOTATION_TIMEOUT_SECONDS: "30"}))), Some(Duration::from_secs(30)));
        assert_eq!(timeout(&annotated("v1", "Pod", json!({ANNOTATION_TIMEOUT_SECONDS: "soon"}))), None);
        assert_eq!(timeout(&annotated("v1", "Pod", json!({}))), None);
    }

    #[test]
    fn delete_skip_only_for_legacy_kinds() {
        let logger: Arc<dyn Logger> = Arc::new(MemoryLogger::new());
        let ctx = Context::background();
        let pod = annotated("v1", "Pod", json!({ANNOTATION_SKIP_AWAIT: "true"}));
        let cond = deleted_condition(&ctx, Arc::new(Static::idle()), Arc::new(NoGet), logger.clone(), &pod, &pod);
        assert!(cond.satisfied().expect("ok"));

        let cm = annotated("v1", "ConfigMap", json!({ANNOTATION_SKIP_AWAIT: "true"}));
        let cond = deleted_condition(&ctx, Arc::new(Static::idle()), Arc::new(NoGet), logger, &cm, &cm);
        assert!(!cond.satisfied().expect("ok"));
    }
}
