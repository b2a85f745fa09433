use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use kawait_core::{Context, Event, EventReceiver, GetError, Gvk, ObjectGetter, ResourceSnapshot, Subscription, SubscriptionFactory};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("static source was already started")]
    AlreadyStarted,
    #[error("subscribing to {gvk}: {source}")]
    Subscribe {
        gvk: Gvk,
        #[source]
        source: anyhow::Error,
    },
}

/// Hands out event channels for a resource type.
#[async_trait]
pub trait Source: Send + Sync {
    async fn start(&self, ctx: &Context, gvk: &Gvk) -> Result<EventReceiver, SourceError>;

    /// Release everything this source created. Idempotent.
    fn stop(&self) {}
}

/// One fixed channel, handed out once. Each observer needs its own `Static`
/// or the two would steal each other's events.
pub struct Static {
    events: Mutex<Option<EventReceiver>>,
    // Keeps an idle source open until the observer's context ends.
    _keepalive: Option<mpsc::Sender<Event>>,
}

impl Static {
    pub fn new(events: EventReceiver) -> Self { Self { events: Mutex::new(Some(events)), _keepalive: None } }

    pub fn channel(capacity: usize) -> (Self, mpsc::Sender<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(rx), tx)
    }

    /// A source that never yields and never closes.
    pub fn idle() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { events: Mutex::new(Some(rx)), _keepalive: Some(tx) }
    }

    /// A source whose channel is already closed.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self::new(rx)
    }
}

#[async_trait]
impl Source for Static {
    async fn start(&self, _ctx: &Context, _gvk: &Gvk) -> Result<EventReceiver, SourceError> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).take().ok_or(SourceError::AlreadyStarted)
    }
}

/// Multiplexes a shared subscription factory into one buffered channel per
/// `start` call.
pub struct DynamicSource {
    factory: Arc<dyn SubscriptionFactory>,
    capacity: usize,
    subscriptions: Mutex<Vec<Box<dyn Subscription>>>,
}

impl DynamicSource {
    /// `capacity` is clamped to at least one so a slow consumer can never
    /// wedge the dispatcher on a rendezvous send.
    pub fn new(factory: Arc<dyn SubscriptionFactory>, capacity: usize) -> Self {
        Self { factory, capacity: capacity.max(1), subscriptions: Mutex::new(Vec::new()) }
    }

    pub fn active(&self) -> usize { self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).len() }
}

#[async_trait]
impl Source for DynamicSource {
    async fn start(&self, _ctx: &Context, gvk: &Gvk) -> Result<EventReceiver, SourceError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let sub = self
            .factory
            .subscribe(gvk, tx)
            .await
            .map_err(|source| SourceError::Subscribe { gvk: gvk.clone(), source })?;
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).push(sub);
        debug!(%gvk, capacity = self.capacity, "source subscribed");
        Ok(rx)
    }

    fn stop(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()));
        if !subs.is_empty() {
            debug!(count = subs.len(), "source releasing subscriptions");
        }
        for sub in subs {
            sub.unsubscribe();
        }
    }
}

impl Drop for DynamicSource {
    fn drop(&mut self) { self.stop() }
}

/// Wraps another source and closes the delete-before-watch race: once the
/// inner subscription is live, an existence check runs, and a not-found
/// answer replaces the stream with a single synthetic Deleted event.
pub struct DeletionSource {
    inner: Arc<dyn Source>,
    getter: Arc<dyn ObjectGetter>,
    obj: ResourceSnapshot,
}

impl DeletionSource {
    pub fn new(inner: Arc<dyn Source>, getter: Arc<dyn ObjectGetter>, obj: ResourceSnapshot) -> Self {
        Self { inner, getter, obj }
    }
}

#[async_trait]
impl Source for DeletionSource {
    async fn start(&self, ctx: &Context, gvk: &Gvk) -> Result<EventReceiver, SourceError> {
        let events = self.inner.start(ctx, gvk).await?;
        // Detached from the caller so the answer arrives even while shutting down.
        match self.getter.get(&Context::background(), self.obj.name()).await {
            Err(GetError::NotFound(_)) => {
                debug!(%gvk, name = self.obj.name(), "object already gone; synthesising delete");
                let (tx, rx) = mpsc::channel(1);
                // Capacity one and a fresh channel, so this cannot fail.
                let _ = tx.try_send(Event::deleted(self.obj.clone()));
                Ok(rx)
            }
            Err(err) => {
                warn!(%gvk, name = self.obj.name(), error = %err, "existence check failed");
                Ok(events)
            }
            Ok(_) => Ok(events),
        }
    }

    fn stop(&self) { self.inner.stop() }
}
