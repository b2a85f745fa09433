//! Blocks until a readiness condition holds, the context ends, or the
//! condition fails, while informational observers report progress on the
//! side.

#![forbid(unsafe_code)]

mod config;
mod error;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use kawait_condition::{Observer, Satisfier};
use kawait_core::{Context, ContextError, Event, Logger, ResourceSnapshot, Severity, TracingLogger};

pub use config::AwaitConfig;
pub use error::{AwaitError, PartialObject};

/// Orchestrates one blocking condition and any number of informational
/// observers.
pub struct Awaiter {
    logger: Arc<dyn Logger>,
    namespace: Option<String>,
    condition: Option<Arc<dyn Satisfier>>,
    observers: Vec<Arc<dyn Observer>>,
}

impl Default for Awaiter {
    fn default() -> Self { Self { logger: Arc::new(TracingLogger), namespace: None, condition: None, observers: Vec::new() } }
}

impl Awaiter {
    pub fn new() -> Self { Self::default() }

    /// Required: decides when `wait` can return.
    pub fn with_condition(mut self, condition: Arc<dyn Satisfier>) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Optional observers that report progress but never block completion.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observer>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Namespace the awaited object lives in, for diagnostics.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }

    /// Drive the condition until it holds. The condition must be built on
    /// `ctx` (or a child of it) so its range ends when `ctx` does.
    ///
    /// On success returns the condition's object. Every failure except a
    /// missing condition carries the last object the condition saw.
    pub async fn wait(&self, ctx: &Context) -> Result<ResourceSnapshot, AwaitError> {
        let Some(condition) = self.condition.as_ref() else {
            return Err(AwaitError::MissingCondition);
        };
        let started = Instant::now();
        let _observers = ObserverTasks::spawn(&self.observers, self.logger.clone());

        let mut observe_err = None;
        {
            let mut visit = |event: Event| {
                if let Err(err) = condition.observe(&event) {
                    observe_err = Some(err);
                    return false;
                }
                !matches!(condition.satisfied(), Ok(true))
            };
            // Not raced against `ctx`: every range ends on its own context,
            // and teardown work such as a final existence check must finish.
            condition.range(&mut visit).await;
        }
        if ctx.is_done() {
            debug!(namespace = ?self.namespace, "await context done");
        }

        // Teardown may have changed the condition's state.
        let res = match condition.satisfied() {
            Ok(true) => Ok(condition.object()),
            recheck => {
                let object = condition.object();
                match observe_err.or(recheck.err()) {
                    Some(source) => Err(AwaitError::Condition { source, object }),
                    None => {
                        let cause = match ctx.err() {
                            Some(ContextError::DeadlineExceeded) => None,
                            other => other,
                        };
                        Err(AwaitError::Interrupted { cause, object })
                    }
                }
            }
        };

        let outcome = match &res {
            Ok(_) => "satisfied",
            Err(err) => err.outcome(),
        };
        counter!("kawait_await_total", 1u64, "outcome" => outcome);
        histogram!("kawait_await_seconds", started.elapsed().as_secs_f64());
        match &res {
            Ok(obj) => info!(name = obj.name(), namespace = ?self.namespace, "await satisfied"),
            Err(err) => info!(namespace = ?self.namespace, outcome, error = %err, "await ended"),
        }
        res
    }
}

/// Informational observer tasks, aborted when dropped.
struct ObserverTasks(Vec<JoinHandle<()>>);

impl ObserverTasks {
    fn spawn(observers: &[Arc<dyn Observer>], logger: Arc<dyn Logger>) -> Self {
        let handles = observers
            .iter()
            .cloned()
            .map(|o| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    o.range(&mut |event| {
                        if let Err(err) = o.observe(&event) {
                            logger.log_status(Severity::Warning, &format!("observe error: {}", err));
                        }
                        true
                    })
                    .await;
                })
            })
            .collect();
        Self(handles)
    }
}

impl Drop for ObserverTasks {
    fn drop(&mut self) {
        for h in &self.0 {
            h.abort();
        }
    }
}
