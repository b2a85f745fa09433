use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc;

use kawait_core::{Event, Gvk, ResourceSnapshot};

use crate::{ConditionError, Observer, Satisfier, Visit};

/// Satisfied when every child is. Events are routed to the children whose
/// tracked object has the event's GVK.
pub struct All {
    children: Vec<Arc<dyn Satisfier>>,
    by_gvk: FxHashMap<Gvk, SmallVec<[usize; 4]>>,
}

impl All {
    pub fn new(children: Vec<Arc<dyn Satisfier>>) -> Result<Self, ConditionError> {
        if children.is_empty() {
            return Err(ConditionError::invalid("", "at least one condition must be specified"));
        }
        let mut by_gvk: FxHashMap<Gvk, SmallVec<[usize; 4]>> = FxHashMap::default();
        for (idx, child) in children.iter().enumerate() {
            by_gvk.entry(child.object().gvk()).or_default().push(idx);
        }
        Ok(Self { children, by_gvk })
    }

    pub fn children(&self) -> &[Arc<dyn Satisfier>] { &self.children }
}

#[async_trait]
impl Observer for All {
    /// Runs every child's `range` concurrently and funnels their events
    /// through one channel, so `visit` is only ever called from this task.
    async fn range(&self, visit: Visit<'_>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let children = join_all(self.children.iter().map(|child| {
            let tx = tx.clone();
            async move {
                child.range(&mut move |e| tx.send(e).is_ok()).await;
            }
        }));
        drop(tx);
        tokio::pin!(children);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        if !visit(event) {
                            // Dropping the receiver makes every forwarder decline.
                            return;
                        }
                    }
                    None => return,
                },
                _ = &mut children => {
                    while let Ok(event) = rx.try_recv() {
                        if !visit(event) {
                            return;
                        }
                    }
                    return;
                }
            }
        }
    }

    fn observe(&self, event: &Event) -> Result<(), ConditionError> {
        let Some(idxs) = self.by_gvk.get(&event.object.gvk()) else {
            return Ok(());
        };
        let errs: Vec<ConditionError> = idxs.iter().filter_map(|&i| self.children[i].observe(event).err()).collect();
        ConditionError::combine(errs).map_or(Ok(()), Err)
    }
}

impl Satisfier for All {
    fn satisfied(&self) -> Result<bool, ConditionError> {
        for child in &self.children {
            if !child.satisfied()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The first child's object, used for error reporting.
    fn object(&self) -> ResourceSnapshot {
        self.children.first().map(|c| c.object()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Custom, Failure, Immediate, Never, ObjectObserver, Static};
    use kawait_core::{Context, MemoryLogger};
    use serde_json::json;
    use std::sync::Mutex;

    fn sat(s: impl Satisfier + 'static) -> Arc<dyn Satisfier> { Arc::new(s) }

    fn obj(api_version: &str, kind: &str) -> ResourceSnapshot {
        ResourceSnapshot::new(json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": "foo"}}))
    }

    /// Records every event offered to it.
    struct Recorder {
        inner: ObjectObserver,
        seen: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn new(source: Static, obj: ResourceSnapshot) -> Self {
            Self { inner: ObjectObserver::new(&Context::background(), Arc::new(source), obj), seen: Mutex::new(Vec::new()) }
        }
        fn seen(&self) -> Vec<Event> { self.seen.lock().expect("lock").clone() }
    }

    #[async_trait]
    impl Observer for Recorder {
        async fn range(&self, visit: Visit<'_>) { self.inner.range(visit).await }
        fn observe(&self, event: &Event) -> Result<(), ConditionError> {
            self.seen.lock().expect("lock").push(event.clone());
            self.inner.observe(event)
        }
    }

    impl Satisfier for Recorder {
        fn satisfied(&self) -> Result<bool, ConditionError> { Ok(!self.seen().is_empty()) }
        fn object(&self) -> ResourceSnapshot { self.inner.object() }
    }

    /// Rejects every event, counting how often it was asked.
    struct Rejecting {
        obj: ResourceSnapshot,
        reason: &'static str,
        calls: Mutex<usize>,
    }

    impl Rejecting {
        fn new(obj: ResourceSnapshot, reason: &'static str) -> Self { Self { obj, reason, calls: Mutex::new(0) } }
        fn calls(&self) -> usize { *self.calls.lock().expect("lock") }
    }

    #[async_trait]
    impl Observer for Rejecting {
        async fn range(&self, _visit: Visit<'_>) {}
        fn observe(&self, _event: &Event) -> Result<(), ConditionError> {
            *self.calls.lock().expect("lock") += 1;
            Err(ConditionError::failed(anyhow::anyhow!(self.reason)))
        }
    }

    impl Satisfier for Rejecting {
        fn satisfied(&self) -> Result<bool, ConditionError> { Ok(false) }
        fn object(&self) -> ResourceSnapshot { self.obj.clone() }
    }

    #[test]
    fn observe_offers_the_event_to_every_child_and_joins_errors() {
        let pod = obj("v1", "Pod");
        let first = Arc::new(Rejecting::new(pod.clone(), "first rejected"));
        let recorder = Arc::new(Recorder::new(Static::idle(), pod.clone()));
        let second = Arc::new(Rejecting::new(pod.clone(), "second rejected"));
        let all = All::new(vec![first.clone() as Arc<dyn Satisfier>, recorder.clone(), second.clone()]).expect("ok");

        let event = Event::modified(pod);
        let err = all.observe(&event).expect_err("both rejections surface");

        assert_eq!(first.calls(), 1);
        assert_eq!(recorder.seen(), vec![event]);
        assert_eq!(second.calls(), 1);
        assert!(matches!(err, ConditionError::Multiple(ref errs) if errs.len() == 2));
        assert_eq!(err.to_string(), "first rejected; second rejected");
    }

    #[test]
    fn requires_children() {
        assert!(All::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn routes_events_by_gvk() {
        let (pod_src, pod_tx) = Static::channel(4);
        let (svc_src, svc_tx) = Static::channel(4);
        let pods = Arc::new(Recorder::new(pod_src, obj("v1", "Pod")));
        let svcs = Arc::new(Recorder::new(svc_src, obj("v1", "Service")));
        let all = All::new(vec![pods.clone() as Arc<dyn Satisfier>, svcs.clone()]).expect("ok");

        let pod_event = Event::modified(obj("v1", "Pod"));
        pod_tx.send(pod_event.clone()).await.expect("send");
        drop(pod_tx);
        drop(svc_tx);

        all.range(&mut |e| {
            all.observe(&e).expect("observe");
            true
        })
        .await;

        assert_eq!(pods.seen(), vec![pod_event]);
        assert!(svcs.seen().is_empty());
        assert!(!all.satisfied().expect("ok"));
    }

    #[test]
    fn satisfied_short_circuits() {
        let o = obj("v1", "Pod");
        let all = All::new(vec![sat(Immediate::new(None, o.clone())), sat(Never::new(o.clone()))]).expect("ok");
        assert!(!all.satisfied().expect("ok"));

        let all = All::new(vec![
            sat(Never::new(o.clone())),
            sat(Failure::new(anyhow::anyhow!("boom"), o.clone())),
        ])
        .expect("ok");
        assert!(!all.satisfied().expect("ok"));

        let all = All::new(vec![
            sat(Failure::new(anyhow::anyhow!("boom"), o.clone())),
            sat(Immediate::new(None, o.clone())),
        ])
        .expect("ok");
        assert!(all.satisfied().is_err());
    }

    #[test]
    fn object_is_first_child() {
        let logger = Arc::new(MemoryLogger::new());
        let first = obj("v1", "ConfigMap");
        let custom = Custom::new(&Context::background(), Arc::new(Static::idle()), logger, first.clone(), "condition=Ready")
            .expect("ok");
        let all = All::new(vec![sat(custom), sat(Never::new(obj("v1", "Pod")))]).expect("ok");
        assert_eq!(all.object(), first);
    }

    #[tokio::test]
    async fn range_stops_when_visit_declines() {
        let (a_src, a_tx) = Static::channel(4);
        let (b_src, _b_tx) = Static::channel(4);
        let a = Arc::new(Recorder::new(a_src, obj("v1", "Pod")));
        let b = Arc::new(Recorder::new(b_src, obj("v1", "Service")));
        let all = All::new(vec![a as Arc<dyn Satisfier>, b]).expect("ok");
        a_tx.send(Event::added(obj("v1", "Pod"))).await.expect("send");
        let mut calls = 0;
        all.range(&mut |_| {
            calls += 1;
            false
        })
        .await;
        assert_eq!(calls, 1);
    }
}
