//! Trivial satisfiers used for opt-outs, composition and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use kawait_core::{Context, Event, Logger, ResourceSnapshot, Severity};

use crate::{ConditionError, ObjectObserver, Observer, Satisfier, Source, Visit};

/// Always satisfied; consumes nothing.
pub struct Immediate {
    logger: Option<Arc<dyn Logger>>,
    obj: ResourceSnapshot,
}

impl Immediate {
    pub fn new(logger: Option<Arc<dyn Logger>>, obj: ResourceSnapshot) -> Self { Self { logger, obj } }
}

#[async_trait]
impl Observer for Immediate {
    async fn range(&self, _visit: Visit<'_>) {}
    fn observe(&self, _event: &Event) -> Result<(), ConditionError> { Ok(()) }
}

impl Satisfier for Immediate {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        if let Some(logger) = &self.logger {
            logger.log_status(Severity::Info, "Skipping await logic");
        }
        Ok(true)
    }

    fn object(&self) -> ResourceSnapshot { self.obj.clone() }
}

/// Never satisfied; consumes nothing.
pub struct Never {
    obj: ResourceSnapshot,
}

impl Never {
    pub fn new(obj: ResourceSnapshot) -> Self { Self { obj } }
}

#[async_trait]
impl Observer for Never {
    async fn range(&self, _visit: Visit<'_>) {}
    fn observe(&self, _event: &Event) -> Result<(), ConditionError> { Ok(()) }
}

impl Satisfier for Never {
    fn satisfied(&self) -> Result<bool, ConditionError> { Ok(false) }
    fn object(&self) -> ResourceSnapshot { self.obj.clone() }
}

/// Satisfied once a specific event has been observed.
pub struct On {
    observer: ObjectObserver,
    want: Event,
    seen: AtomicBool,
}

impl On {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, obj: ResourceSnapshot, want: Event) -> Self {
        Self { observer: ObjectObserver::new(ctx, source, obj), want, seen: AtomicBool::new(false) }
    }
}

#[async_trait]
impl Observer for On {
    async fn range(&self, visit: Visit<'_>) { self.observer.range(visit).await }

    fn observe(&self, event: &Event) -> Result<(), ConditionError> {
        let res = self.observer.observe(event);
        if *event == self.want {
            self.seen.store(true, Ordering::SeqCst);
        }
        res
    }
}

impl Satisfier for On {
    fn satisfied(&self) -> Result<bool, ConditionError> { Ok(self.seen.load(Ordering::SeqCst)) }
    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}

/// Satisfied only after `range` has returned. Exercises the await loop's
/// final re-check.
pub struct Stopped {
    obj: ResourceSnapshot,
    stopped: AtomicBool,
}

impl Stopped {
    pub fn new(obj: ResourceSnapshot) -> Self { Self { obj, stopped: AtomicBool::new(false) } }
}

#[async_trait]
impl Observer for Stopped {
    async fn range(&self, _visit: Visit<'_>) { self.stopped.store(true, Ordering::SeqCst) }
    fn observe(&self, _event: &Event) -> Result<(), ConditionError> { Ok(()) }
}

impl Satisfier for Stopped {
    fn satisfied(&self) -> Result<bool, ConditionError> { Ok(self.stopped.load(Ordering::SeqCst)) }
    fn object(&self) -> ResourceSnapshot { self.obj.clone() }
}

/// Always reports the injected error.
pub struct Failure {
    err: ConditionError,
    obj: ResourceSnapshot,
}

impl Failure {
    pub fn new(err: impl Into<anyhow::Error>, obj: ResourceSnapshot) -> Self {
        Self { err: ConditionError::failed(err), obj }
    }
}

#[async_trait]
impl Observer for Failure {
    async fn range(&self, _visit: Visit<'_>) {}
    fn observe(&self, _event: &Event) -> Result<(), ConditionError> { Ok(()) }
}

impl Satisfier for Failure {
    fn satisfied(&self) -> Result<bool, ConditionError> { Err(self.err.clone()) }
    fn object(&self) -> ResourceSnapshot { self.obj.clone() }
}
