use rustc_hash::FxHashMap;

use kawait_core::{Event, ResourceSnapshot};

/// Last-known revision of every object an informer has seen, keyed by
/// `namespace/name`.
#[derive(Debug, Default)]
pub(crate) struct Cache {
    objects: FxHashMap<String, ResourceSnapshot>,
    synced: bool,
}

fn key(obj: &ResourceSnapshot) -> String { format!("{}/{}", obj.namespace().unwrap_or(""), obj.name()) }

impl Cache {
    pub(crate) fn is_synced(&self) -> bool { self.synced }

    pub(crate) fn len(&self) -> usize { self.objects.len() }

    /// Record an upsert. Returns `None` when the revision is already cached.
    pub(crate) fn apply(&mut self, obj: ResourceSnapshot) -> Option<Event> {
        match self.objects.insert(key(&obj), obj.clone()) {
            None => Some(Event::added(obj)),
            Some(prev) if prev.resource_version() == obj.resource_version() && !obj.resource_version().is_empty() => None,
            Some(_) => Some(Event::modified(obj)),
        }
    }

    /// Record a deletion. The final state reported by the watch wins over the
    /// cached one.
    pub(crate) fn delete(&mut self, obj: ResourceSnapshot) -> Event {
        self.objects.remove(&key(&obj));
        Event::deleted(obj)
    }

    /// Replace the cache with a full relist and return the events that turn
    /// the old view into the new one. Objects missing from the relist are
    /// reported deleted with their last cached state.
    pub(crate) fn restart(&mut self, list: Vec<ResourceSnapshot>) -> Vec<Event> {
        let mut previous = std::mem::take(&mut self.objects);
        let mut events = Vec::new();
        for obj in list {
            let k = key(&obj);
            match previous.remove(&k) {
                None => events.push(Event::added(obj.clone())),
                Some(prev) if prev.resource_version() == obj.resource_version() => {}
                Some(_) => events.push(Event::modified(obj.clone())),
            }
            self.objects.insert(k, obj);
        }
        let mut vanished: Vec<_> = previous.into_values().collect();
        vanished.sort_by(|a, b| key(a).cmp(&key(b)));
        events.extend(vanished.into_iter().map(Event::deleted));
        self.synced = true;
        events
    }

    /// Cached objects as Added events, for replay to a new subscriber.
    pub(crate) fn replay(&self) -> Vec<Event> {
        let mut objs: Vec<_> = self.objects.values().cloned().collect();
        objs.sort_by(|a, b| key(a).cmp(&key(b)));
        objs.into_iter().map(Event::added).collect()
    }
}
