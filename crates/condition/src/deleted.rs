use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use kawait_core::{Context, Event, EventKind, GetError, Logger, ObjectGetter, ResourceSnapshot, Severity, StatusComputer};

use crate::{ConditionError, KStatus, ObjectObserver, Observer, Satisfier, Source, Visit};

const UNKNOWN: u8 = 0;
const NOT_DELETED: u8 = 1;
const DELETED: u8 = 2;

/// Satisfied once the object is gone: either a Deleted event arrives or a
/// point-in-time read returns not-found.
///
/// Deletion is sticky. A later read that still finds the object (a stale
/// cache or a read that raced the delete) never clears it.
pub struct Deleted {
    observer: ObjectObserver,
    logger: Arc<dyn Logger>,
    getter: Arc<dyn ObjectGetter>,
    computer: Arc<dyn StatusComputer>,
    state: AtomicU8,
}

impl Deleted {
    pub fn new(
        ctx: &Context,
        source: Arc<dyn Source>,
        getter: Arc<dyn ObjectGetter>,
        logger: Arc<dyn Logger>,
        obj: ResourceSnapshot,
    ) -> Self {
        Self {
            observer: ObjectObserver::new(ctx, source, obj),
            logger,
            getter,
            computer: Arc::new(KStatus),
            state: AtomicU8::new(UNKNOWN),
        }
    }

    pub fn is_deleted(&self) -> bool { self.state.load(Ordering::SeqCst) == DELETED }

    fn mark_deleted(&self) { self.state.store(DELETED, Ordering::SeqCst) }

    fn mark_present(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| (s != DELETED).then_some(NOT_DELETED));
    }

    /// Read the object from the cluster and record whether it still exists.
    /// Runs detached from the observer's context so it completes during
    /// shutdown too.
    async fn refresh_cluster_state(&self) {
        let obj = self.observer.object();
        match self.getter.get(&Context::background(), obj.name()).await {
            Ok(_) => self.mark_present(),
            Err(GetError::NotFound(_)) => {
                debug!(name = obj.name(), "object not found");
                self.mark_deleted();
            }
            Err(err) => {
                warn!(name = obj.name(), error = %err, "existence check failed");
                self.logger
                    .log(Severity::Warning, &format!("failed to check whether {} still exists: {}", obj.name(), err));
            }
        }
    }
}

#[async_trait]
impl Observer for Deleted {
    async fn range(&self, visit: Visit<'_>) {
        // Subscribe before checking existence so a delete landing between
        // the two is still seen on the stream.
        if let Some(events) = self.observer.events().open().await {
            let watch = self.observer.events().drain(events, visit);
            tokio::pin!(watch);
            let mut watch_done = false;
            {
                let check = self.refresh_cluster_state();
                tokio::pin!(check);
                loop {
                    tokio::select! {
                        _ = &mut check => break,
                        _ = &mut watch, if !watch_done => {
                            watch_done = true;
                            // The stream already saw the delete; the read in flight is moot.
                            if self.is_deleted() {
                                return;
                            }
                        }
                    }
                }
            }
            if self.is_deleted() {
                return;
            }
            if !watch_done {
                watch.await;
            }
            if self.is_deleted() {
                return;
            }
        }

        // One more look once the stream is exhausted.
        self.refresh_cluster_state().await;
        if self.is_deleted() {
            return;
        }

        let obj = self.observer.object();
        let finalizers = obj.finalizers();
        if !finalizers.is_empty() {
            self.logger.log(
                Severity::Warning,
                &format!("finalizers might be preventing deletion ({})", finalizers.join(", ")),
            );
        }
    }

    fn observe(&self, event: &Event) -> Result<(), ConditionError> {
        if event.kind == EventKind::Deleted {
            self.mark_deleted();
        }
        self.observer.observe(event)
    }
}

impl Satisfier for Deleted {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        if self.is_deleted() {
            return Ok(true);
        }
        let res = self.computer.compute(&self.observer.object());
        if !res.message.is_empty() {
            self.logger.log_status(Severity::Info, &res.message);
        }
        Ok(false)
    }

    fn object(&self) -> ResourceSnapshot { self.observer.object() }
}
