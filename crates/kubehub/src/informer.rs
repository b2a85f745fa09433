//! Shared per-GVK watchers with fan-out to any number of subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures::{Stream, StreamExt};
use kube::{
    api::{Api, DynamicObject},
    core::ApiResource,
    runtime::{watcher, WatchStreamExt},
    Client,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kawait_core::{Event, EventKind, Gvk, ResourceSnapshot, Subscription, SubscriptionFactory};

use crate::cache::Cache;
use crate::{api_for, find_api_resource, snapshot_from};

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) enum Command {
    Subscribe { id: u64, events: mpsc::Sender<Event>, ack: oneshot::Sender<()> },
    Unsubscribe { id: u64 },
}

/// Lazily starts one watcher per GVK, scoped to a namespace or the whole
/// cluster, and shares it between subscribers.
pub struct InformerFactory {
    client: Client,
    namespace: Option<String>,
    sync_timeout: Duration,
    informers: Mutex<FxHashMap<Gvk, mpsc::UnboundedSender<Command>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl InformerFactory {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            informers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// How long `subscribe` waits for the initial list before giving up.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }

    /// Stop every informer task. Later subscriptions fail.
    pub fn shutdown(&self) {
        info!(namespace = ?self.namespace, "informer factory shutting down");
        self.shutdown.cancel();
    }

    async fn informer(&self, gvk: &Gvk) -> Result<mpsc::UnboundedSender<Command>> {
        if self.shutdown.is_cancelled() {
            bail!("informer factory is shut down");
        }
        let mut informers = self.informers.lock().await;
        if let Some(tx) = informers.get(gvk) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
            debug!(gvk = %gvk, "restarting stopped informer");
        }
        let (ar, namespaced) = find_api_resource(self.client.clone(), gvk).await?;
        let api = api_for(self.client.clone(), &ar, namespaced, self.namespace.as_deref());
        let tx = spawn_informer(gvk.clone(), ar, watch(api), self.shutdown.child_token());
        info!(gvk = %gvk, namespace = ?self.namespace, "informer started");
        informers.insert(gvk.clone(), tx.clone());
        Ok(tx)
    }
}

impl Drop for InformerFactory {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

#[async_trait::async_trait]
impl SubscriptionFactory for InformerFactory {
    async fn subscribe(&self, gvk: &Gvk, events: mpsc::Sender<Event>) -> Result<Box<dyn Subscription>> {
        let commands = self.informer(gvk).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = register(gvk, id, commands, events, self.sync_timeout).await?;
        Ok(Box::new(sub))
    }
}

fn watch(api: Api<DynamicObject>) -> impl Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>> + Send {
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}

/// Register a subscriber with a running informer and wait for its cache to
/// sync.
pub(crate) async fn register(
    gvk: &Gvk,
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Sender<Event>,
    sync_timeout: Duration,
) -> Result<InformerSubscription> {
    let (ack, synced) = oneshot::channel();
    commands
        .send(Command::Subscribe { id, events, ack })
        .map_err(|_| anyhow!("informer for {} has stopped", gvk))?;
    match tokio::time::timeout(sync_timeout, synced).await {
        Ok(Ok(())) => Ok(InformerSubscription::new(id, commands)),
        Ok(Err(_)) => Err(anyhow!("informer for {} stopped before syncing", gvk)),
        Err(_) => {
            let _ = commands.send(Command::Unsubscribe { id });
            Err(anyhow!("timed out waiting for the {} informer to sync", gvk))
        }
    }
}

/// Handle returned by [`InformerFactory::subscribe`]; detaches on drop.
pub struct InformerSubscription {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    detached: AtomicBool,
}

impl InformerSubscription {
    fn new(id: u64, commands: mpsc::UnboundedSender<Command>) -> Self { Self { id, commands, detached: AtomicBool::new(false) } }
}

impl Subscription for InformerSubscription {
    fn unsubscribe(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Unsubscribe { id: self.id });
        }
    }
}

impl Drop for InformerSubscription {
    fn drop(&mut self) { self.unsubscribe() }
}

pub(crate) fn spawn_informer<S>(gvk: Gvk, resource: ApiResource, stream: S, shutdown: CancellationToken) -> mpsc::UnboundedSender<Command>
where
    S: Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let informer = Informer { gvk, resource, cache: Cache::default(), subscribers: Vec::new(), pending: Vec::new() };
    tokio::spawn(informer.run(stream, rx, shutdown));
    tx
}

struct Informer {
    gvk: Gvk,
    resource: ApiResource,
    cache: Cache,
    subscribers: Vec<(u64, mpsc::Sender<Event>)>,
    pending: Vec<(u64, mpsc::Sender<Event>, oneshot::Sender<()>)>,
}

impl Informer {
    async fn run<S>(mut self, stream: S, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken)
    where
        S: Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>> + Send,
    {
        futures::pin_mut!(stream);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                next = stream.next() => match next {
                    Some(Ok(ev)) => self.on_watch_event(ev).await,
                    Some(Err(err)) => {
                        counter!("kawait_informer_errors_total", 1u64, "gvk" => self.gvk.to_string());
                        warn!(gvk = %self.gvk, error = %err, "watch error; backing off");
                    }
                    None => {
                        warn!(gvk = %self.gvk, "watch stream ended");
                        break;
                    }
                },
            }
        }
        debug!(gvk = %self.gvk, subscribers = self.subscribers.len(), "informer stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe { id, events, ack } => {
                if self.cache.is_synced() {
                    self.attach(id, events, ack).await;
                } else {
                    self.pending.push((id, events, ack));
                }
            }
            Command::Unsubscribe { id } => {
                self.subscribers.retain(|(sid, _)| *sid != id);
                self.pending.retain(|(sid, _, _)| *sid != id);
                debug!(gvk = %self.gvk, id, "subscriber detached");
            }
        }
    }

    /// Acknowledge first: the subscriber only starts reading once `subscribe`
    /// returns, and the replay may exceed its channel capacity.
    async fn attach(&mut self, id: u64, events: mpsc::Sender<Event>, ack: oneshot::Sender<()>) {
        if ack.send(()).is_err() {
            return;
        }
        for event in self.cache.replay() {
            if events.send(event).await.is_err() {
                return;
            }
        }
        self.subscribers.push((id, events));
    }

    async fn on_watch_event(&mut self, ev: watcher::Event<DynamicObject>) {
        match ev {
            watcher::Event::Applied(obj) => {
                if let Some(event) = self.snapshot(&obj).and_then(|s| self.cache.apply(s)) {
                    self.dispatch(event).await;
                }
            }
            watcher::Event::Deleted(obj) => {
                if let Some(snap) = self.snapshot(&obj) {
                    let event = self.cache.delete(snap);
                    self.dispatch(event).await;
                }
            }
            watcher::Event::Restarted(list) => {
                let snaps: Vec<_> = list.iter().filter_map(|o| self.snapshot(o)).collect();
                let events = self.cache.restart(snaps);
                debug!(gvk = %self.gvk, objects = self.cache.len(), changes = events.len(), "informer relisted");
                for event in events {
                    self.dispatch(event).await;
                }
                for (id, events, ack) in std::mem::take(&mut self.pending) {
                    self.attach(id, events, ack).await;
                }
            }
        }
    }

    fn snapshot(&self, obj: &DynamicObject) -> Option<ResourceSnapshot> {
        match snapshot_from(obj, &self.resource) {
            Ok(snap) => Some(snap),
            Err(err) => {
                warn!(gvk = %self.gvk, error = ?err, "dropping unreadable object");
                None
            }
        }
    }

    async fn dispatch(&mut self, event: Event) {
        let kind = match event.kind {
            EventKind::Added => "added",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
        };
        counter!("kawait_informer_events_total", 1u64, "kind" => kind);
        let mut closed = Vec::new();
        for (id, tx) in &self.subscribers {
            if tx.send(event.clone()).await.is_err() {
                closed.push(*id);
            }
        }
        if !closed.is_empty() {
            self.subscribers.retain(|(id, _)| !closed.contains(id));
        }
    }
}
