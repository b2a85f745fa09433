use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use kawait_core::{Context, Event, EventReceiver, Gvk, ResourceSnapshot};

use crate::{ConditionError, Observer, Source, Visit};

type Keep = Box<dyn Fn(&ResourceSnapshot) -> bool + Send + Sync>;

/// Stateless filter over a source: passes along events for one GVK whose
/// object satisfies `keep`.
pub struct EventObserver {
    ctx: Context,
    source: Arc<dyn Source>,
    gvk: Gvk,
    keep: Keep,
}

impl EventObserver {
    pub fn new(
        ctx: &Context,
        source: Arc<dyn Source>,
        gvk: Gvk,
        keep: impl Fn(&ResourceSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { ctx: ctx.clone(), source, gvk, keep: Box::new(keep) }
    }

    pub fn gvk(&self) -> &Gvk { &self.gvk }

    pub fn context(&self) -> &Context { &self.ctx }

    /// Open the underlying source. Failure is logged and treated as an
    /// empty stream.
    pub(crate) async fn open(&self) -> Option<EventReceiver> {
        match self.source.start(&self.ctx, &self.gvk).await {
            Ok(events) => Some(events),
            Err(err) => {
                warn!(gvk = %self.gvk, error = %err, "failed to start event source");
                None
            }
        }
    }

    pub(crate) async fn drain(&self, mut events: EventReceiver, visit: Visit<'_>) {
        loop {
            tokio::select! {
                biased;
                _ = self.ctx.done() => return,
                maybe = events.recv() => {
                    let Some(event) = maybe else { return };
                    if !event.object.is_object() || !(self.keep)(&event.object) {
                        continue;
                    }
                    if !visit(event) {
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Observer for EventObserver {
    async fn range(&self, visit: Visit<'_>) {
        if let Some(events) = self.open().await {
            self.drain(events, visit).await;
        }
    }

    fn observe(&self, _event: &Event) -> Result<(), ConditionError> { Ok(()) }
}

/// Watches objects of `gvk` owned by `owner`.
pub fn child_observer(ctx: &Context, source: Arc<dyn Source>, owner: &ResourceSnapshot, gvk: Gvk) -> EventObserver {
    let owner = owner.clone();
    EventObserver::new(ctx, source, gvk, move |obj| obj.is_owned_by(&owner))
}

/// Tracks the latest state of one named object and refuses to move
/// backwards in (generation, resourceVersion) order.
pub struct ObjectObserver {
    inner: EventObserver,
    obj: Mutex<ResourceSnapshot>,
}

impl ObjectObserver {
    pub fn new(ctx: &Context, source: Arc<dyn Source>, obj: ResourceSnapshot) -> Self {
        let name = obj.name().to_string();
        let inner = EventObserver::new(ctx, source, obj.gvk(), move |u| u.name() == name);
        Self { inner, obj: Mutex::new(obj) }
    }

    pub fn object(&self) -> ResourceSnapshot { self.obj.lock().unwrap_or_else(|p| p.into_inner()).clone() }

    pub(crate) fn events(&self) -> &EventObserver { &self.inner }
}

/// Whether `incoming` is provably older than `current`.
fn is_stale(current: &ResourceSnapshot, incoming: &ResourceSnapshot) -> bool {
    let (cur_gen, new_gen) = (current.generation(), incoming.generation());
    if new_gen != cur_gen {
        return new_gen < cur_gen;
    }
    match (current.resource_version().parse::<i64>(), incoming.resource_version().parse::<i64>()) {
        (Ok(cur), Ok(new)) => new < cur,
        _ => false,
    }
}

#[async_trait]
impl Observer for ObjectObserver {
    async fn range(&self, visit: Visit<'_>) { self.inner.range(visit).await }

    fn observe(&self, event: &Event) -> Result<(), ConditionError> {
        let mut obj = self.obj.lock().unwrap_or_else(|p| p.into_inner());
        if is_stale(&obj, &event.object) {
            counter!("kawait_stale_events_filtered_total", 1u64);
            debug!(
                name = event.object.name(),
                generation = event.object.generation(),
                resource_version = event.object.resource_version(),
                "ignoring stale event"
            );
            return Ok(());
        }
        *obj = event.object.clone();
        Ok(())
    }
}
