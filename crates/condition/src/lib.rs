//! Readiness conditions driven by resource change streams.
//!
//! A [`Source`] hands out event channels per GVK. An [`Observer`] filters a
//! source down to the events it cares about and may fold them into state. A
//! [`Satisfier`] is an observer that can also answer "are we there yet?".
//!
//! Observers never own their source; sources are injected and shared by
//! reference across observers watching the same cluster.

#![forbid(unsafe_code)]

mod all;
mod custom;
mod deleted;
mod events;
pub mod expression;
mod immediate;
mod jsonpath;
pub mod kstatus;
mod observer;
pub mod overrides;
mod ready;
mod source;

use std::sync::Arc;

use kawait_core::{Event, ResourceSnapshot};

pub use all::All;
pub use custom::{parse_custom, Custom};
pub use deleted::Deleted;
pub use events::EventAggregator;
pub use expression::{ConditionExpr, Expression};
pub use immediate::{Failure, Immediate, Never, On, Stopped};
pub use jsonpath::JsonPathCondition;
pub use kstatus::KStatus;
pub use observer::{child_observer, EventObserver, ObjectObserver};
pub use ready::Ready;
pub use source::{DeletionSource, DynamicSource, Source, SourceError, Static};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConditionError {
    #[error("invalid condition expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error(transparent)]
    JsonPath(#[from] kawait_jsonpath::JsonPathError),
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
    #[error("{}", join_errors(.0))]
    Multiple(Vec<ConditionError>),
}

impl ConditionError {
    pub fn failed(err: impl Into<anyhow::Error>) -> Self { ConditionError::Failed(Arc::new(err.into())) }

    pub(crate) fn invalid(expr: &str, reason: impl Into<String>) -> Self {
        ConditionError::InvalidExpression { expr: expr.to_string(), reason: reason.into() }
    }

    /// Fold a batch of errors: `None` when empty, the error itself when alone.
    pub fn combine(mut errs: Vec<ConditionError>) -> Option<ConditionError> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(ConditionError::Multiple(errs)),
        }
    }
}

fn join_errors(errs: &[ConditionError]) -> String {
    errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Callback handed to [`Observer::range`]. Returning `false` stops iteration.
pub type Visit<'a> = &'a mut (dyn FnMut(Event) -> bool + Send);

/// Acts on an event source.
#[async_trait::async_trait]
pub trait Observer: Send + Sync {
    /// Iterate over every event visible to this observer until the stream
    /// closes, the observer's context is done, or `visit` returns `false`.
    /// The caller is responsible for invoking [`Observer::observe`] from
    /// inside `visit`.
    async fn range(&self, visit: Visit<'_>);

    /// Fold an event into the observer's state. Never suspends.
    fn observe(&self, event: &Event) -> Result<(), ConditionError>;
}

/// An observer that can report whether its readiness condition holds.
pub trait Satisfier: Observer {
    fn satisfied(&self) -> Result<bool, ConditionError>;

    /// Last-known state of the tracked object.
    fn object(&self) -> ResourceSnapshot;
}

/// Message describing why `obj`'s status lags behind its spec, if it does.
/// Objects without `metadata.generation` or without an observed generation
/// are never considered stale.
pub(crate) fn stale_generation(obj: &ResourceSnapshot, observed: Option<i64>) -> Option<String> {
    let generation = obj.get_i64(&["metadata", "generation"])?;
    let observed = observed?;
    (observed < generation).then(|| format!("Generation {} is less than expected {}", observed, generation))
}

pub(crate) fn status_observed_generation(obj: &ResourceSnapshot) -> Option<i64> {
    obj.get_i64(&["status", "observedGeneration"])
}
