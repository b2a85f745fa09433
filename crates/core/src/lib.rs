//! kawait core types: resource snapshots, change events, cancellable contexts
//! and the traits the await engine expects from its collaborators.

#![forbid(unsafe_code)]

mod context;
mod logging;
mod snapshot;

pub use context::{Context, ContextError};
pub use logging::{DedupLogger, Logger, MemoryLogger, Severity, TracingLogger};
pub use snapshot::{Gvk, ResourceSnapshot};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// A single change notification. Two events are equal when their kinds match
/// and their objects are deeply equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub object: ResourceSnapshot,
}

impl Event {
    pub fn new(kind: EventKind, object: ResourceSnapshot) -> Self { Self { kind, object } }
    pub fn added(object: ResourceSnapshot) -> Self { Self::new(EventKind::Added, object) }
    pub fn modified(object: ResourceSnapshot) -> Self { Self::new(EventKind::Modified, object) }
    pub fn deleted(object: ResourceSnapshot) -> Self { Self::new(EventKind::Deleted, object) }
}

/// Receiving half of an event channel handed out by a source.
pub type EventReceiver = mpsc::Receiver<Event>;

// ---- collaborators ----

/// Handle for one registration against a [`SubscriptionFactory`].
pub trait Subscription: Send + Sync {
    /// Detach from the shared dispatcher. Calling this more than once is a no-op.
    fn unsubscribe(&self);
}

/// Turns a watch API into deduplicated, shared event streams keyed by GVK.
///
/// Implementations must deliver every change affecting matching objects at
/// least once. Duplicates and out-of-order delivery are tolerated downstream.
#[async_trait::async_trait]
pub trait SubscriptionFactory: Send + Sync {
    async fn subscribe(&self, gvk: &Gvk, events: mpsc::Sender<Event>) -> anyhow::Result<Box<dyn Subscription>>;
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GetError {
    pub fn is_not_found(&self) -> bool { matches!(self, GetError::NotFound(_)) }
}

/// Point-in-time reads of a single object kind.
#[async_trait::async_trait]
pub trait ObjectGetter: Send + Sync {
    async fn get(&self, ctx: &Context, name: &str) -> Result<ResourceSnapshot, GetError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Current,
    InProgress,
    Failed,
    Terminating,
    Unknown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Current => "Current",
            Status::InProgress => "InProgress",
            Status::Failed => "Failed",
            Status::Terminating => "Terminating",
            Status::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResult {
    pub status: Status,
    pub message: String,
}

impl StatusResult {
    pub fn new(status: Status, message: impl Into<String>) -> Self { Self { status, message: message.into() } }
}

/// Generic readiness computation over arbitrary object shapes.
pub trait StatusComputer: Send + Sync {
    fn compute(&self, obj: &ResourceSnapshot) -> StatusResult;
}

pub mod prelude {
    pub use super::{
        Context, ContextError, Event, EventKind, EventReceiver, GetError, Gvk, Logger, ObjectGetter,
        ResourceSnapshot, Severity, Status, StatusComputer, StatusResult, Subscription, SubscriptionFactory,
    };
}
