use std::sync::Arc;

use async_trait::async_trait;

use kawait_core::{Context, Event, Logger, ResourceSnapshot, Severity};
use kawait_jsonpath::JsonPath;

use crate::{stale_generation, status_observed_generation, ConditionError, ObjectObserver, Observer, Satisfier, Source, Visit};

/// Waits for a `jsonpath=` expression to match the tracked object.
pub struct JsonPathCondition {
    observer: ObjectObserver,
    logger: Arc<dyn Logger>,
    expr: JsonPath,
}

impl JsonPathCondition {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, logger: Arc<dyn Logger>, obj: ResourceSnapshot, expr: JsonPath) -> Self {
        Self { observer: ObjectObserver::new(ctx, source, obj), logger, expr }
    }

    pub fn expression(&self) -> &JsonPath { &self.expr }
}

#[async_trait]
impl Observer for JsonPathCondition {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }
    fn observe(&self, event: &Event) -> Result<(), ConditionError> { self.observer.observe(event) }
}

impl Satisfier for JsonPathCondition {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        let obj = self.observer.object();
        if let Some(msg) = stale_generation(&obj, status_observed_generation(&obj)) {
            self.logger.log_status(Severity::Info, &msg);
            return Ok(false);
        }

        let res = self.expr.matches(obj.value())?;
        if res.matched {
            return Ok(true);
        }
        let msg = if !res.message.is_empty() {
            res.message
        } else {
            match &self.expr.value {
                Some(want) => format!("Wanted {}={} but found {:?}", self.expr.path, want, res.found),
                None => format!("Waiting for {}", self.expr.path),
            }
        };
        self.logger.log_status(Severity::Info, &msg);
        Ok(false)
    }

    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}
