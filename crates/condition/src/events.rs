use std::sync::Arc;

use async_trait::async_trait;

use kawait_core::{Context, Event, EventKind, Gvk, Logger, ResourceSnapshot, Severity};

use crate::{ConditionError, EventObserver, Observer, Source, Visit};

/// Surfaces cluster `Event`s about one object as status messages.
/// Informational only: `observe` never fails.
pub struct EventAggregator {
    observer: EventObserver,
    logger: Arc<dyn Logger>,
}

impl EventAggregator {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, logger: Arc<dyn Logger>, owner: &ResourceSnapshot) -> Self {
        let uid = owner.uid().to_string();
        let observer = EventObserver::new(ctx, source, Gvk::new("", "v1", "Event"), move |e| {
            !uid.is_empty() && e.get_str(&["involvedObject", "uid"]) == Some(uid.as_str())
        });
        Self { observer, logger }
    }
}

fn describe(event: &ResourceSnapshot) -> String {
    let kind = event.get_str(&["involvedObject", "kind"]).unwrap_or("").to_lowercase();
    let name = event.get_str(&["involvedObject", "name"]).unwrap_or("");
    let reason = event.get_str(&["reason"]).unwrap_or("");
    let message = event.get_str(&["message"]).unwrap_or("").trim();
    format!("[{}/{}] {}: {}", kind, name, reason, message)
}

#[async_trait]
impl Observer for EventAggregator {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }

    fn observe(&self, event: &Event) -> Result<(), ConditionError> {
        // Deleted Event objects have simply expired.
        if event.kind == EventKind::Deleted {
            return Ok(());
        }
        let sev = match event.object.get_str(&["type"]) {
            Some("Warning") => Severity::Warning,
            _ => Severity::Debug,
        };
        self.logger.log_status(sev, &describe(&event.object));
        Ok(())
    }
}
