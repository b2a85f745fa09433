use std::sync::Arc;

use async_trait::async_trait;

use kawait_core::{Context, Event, Logger, ResourceSnapshot, Severity, Status, StatusComputer};

use crate::{ConditionError, KStatus, ObjectObserver, Observer, Satisfier, Source, Visit};

/// Satisfied when the status computer reports the object as current.
pub struct Ready {
    observer: ObjectObserver,
    logger: Arc<dyn Logger>,
    computer: Arc<dyn StatusComputer>,
}

impl Ready {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, logger: Arc<dyn Logger>, obj: ResourceSnapshot) -> Self {
        Self { observer: ObjectObserver::new(ctx, source, obj), logger, computer: Arc::new(KStatus) }
    }

    pub fn with_status_computer(mut self, computer: Arc<dyn StatusComputer>) -> Self {
        self.computer = computer;
        self
    }
}

#[async_trait]
impl Observer for Ready {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }
    fn observe(&self, event: &Event) -> Result<(), ConditionError> { self.observer.observe(event) }
}

impl Satisfier for Ready {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        let res = self.computer.compute(&self.observer.object());
        if res.status == Status::Current {
            return Ok(true);
        }
        let msg = if res.message.is_empty() { "Waiting for readiness" } else { res.message.as_str() };
        let sev = if res.status == Status::Failed { Severity::Warning } else { Severity::Info };
        self.logger.log_status(sev, msg);
        Ok(false)
    }

    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Static;
    use kawait_core::{MemoryLogger, StatusResult};
    use serde_json::json;

    struct Fixed(Status);
    impl StatusComputer for Fixed {
        fn compute(&self, _obj: &ResourceSnapshot) -> StatusResult { StatusResult::new(self.0, "") }
    }

    fn ready(obj: serde_json::Value) -> (Ready, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        (Ready::new(&Context::background(), Arc::new(Static::idle()), logger.clone(), ResourceSnapshot::new(obj)), logger)
    }

    #[test]
    fn delegates_to_status_computation() {
        let (r, _) = ready(json!({"apiVersion": "v1", "kind": "PersistentVolumeClaim", "status": {"phase": "Bound"}}));
        assert!(r.satisfied().expect("ok"));

        let (r, logger) = ready(json!({"apiVersion": "v1", "kind": "PersistentVolumeClaim", "status": {"phase": "Pending"}}));
        assert!(!r.satisfied().expect("ok"));
        assert!(logger.contains("PVC is not Bound"));
    }

    #[test]
    fn custom_computer_with_empty_message() {
        let (r, logger) = ready(json!({}));
        let r = r.with_status_computer(Arc::new(Fixed(Status::InProgress)));
        assert!(!r.satisfied().expect("ok"));
        assert!(logger.contains("Waiting for readiness"));
    }

    #[test]
    fn ignores_stale_generation_events() {
        let (r, _) = ready(json!({
            "apiVersion": "v1", "kind": "PersistentVolumeClaim",
            "metadata": {"name": "pvc", "generation": 2}, "status": {"phase": "Pending"}
        }));
        let stale = ResourceSnapshot::new(json!({
            "apiVersion": "v1", "kind": "PersistentVolumeClaim",
            "metadata": {"name": "pvc", "generation": 1}, "status": {"phase": "Bound"}
        }));
        r.observe(&Event::modified(stale)).expect("ok");
        assert!(!r.satisfied().expect("ok"));
    }
}
