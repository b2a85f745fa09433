//! kawait kubehub: kube-rs backed collaborators for the await engine.
//!
//! Discovery resolves a [`Gvk`] to an API resource, [`InformerFactory`]
//! shares one watcher per GVK between subscribers, and [`KubeGetter`] reads
//! single objects.

#![forbid(unsafe_code)]

mod cache;
mod informer;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context as _, Result};
use kube::{
    api::{Api, DynamicObject},
    core::{ApiResource, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use kawait_core::{Context, GetError, Gvk, ObjectGetter, ResourceSnapshot};

pub use informer::{InformerFactory, InformerSubscription};

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn client() -> Result<Client> { Client::try_default().await.context("building kube client") }

/// Resolve a GVK to its API resource and whether it is namespaced.
pub async fn find_api_resource(client: Client, gvk: &Gvk) -> Result<(ApiResource, bool)> {
    let key = GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
    let (ar, caps) = discovery::pinned_kind(&client, &key).await.map_err(|e| anyhow!("GVK not found: {}: {}", gvk, e))?;
    let namespaced = matches!(caps.scope, Scope::Namespaced);
    debug!(gvk = %gvk, plural = %ar.plural, namespaced, "resolved api resource");
    Ok((ar, namespaced))
}

/// Api handle for a resource. Cluster-scoped resources ignore `namespace`.
pub fn api_for(client: Client, ar: &ApiResource, namespaced: bool, namespace: Option<&str>) -> Api<DynamicObject> {
    match (namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, ar),
        _ => Api::all_with(client, ar),
    }
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}

/// Convert a watched object into a snapshot. List items arrive without type
/// metadata, so `apiVersion`/`kind` are filled in from the resource.
pub(crate) fn snapshot_from(obj: &DynamicObject, ar: &ApiResource) -> Result<ResourceSnapshot> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    let map = raw.as_object_mut().ok_or_else(|| anyhow!("object did not serialize to a map"))?;
    for (field, value) in [("apiVersion", &ar.api_version), ("kind", &ar.kind)] {
        let missing = map.get(field).and_then(Value::as_str).map_or(true, str::is_empty);
        if missing {
            map.insert(field.to_string(), Value::String(value.clone()));
        }
    }
    Ok(ResourceSnapshot::new(raw))
}

/// Point-in-time reads through the API server.
pub struct KubeGetter {
    api: Api<DynamicObject>,
    resource: ApiResource,
}

impl KubeGetter {
    pub fn new(api: Api<DynamicObject>, resource: ApiResource) -> Self { Self { api, resource } }

    pub async fn for_gvk(client: Client, gvk: &Gvk, namespace: Option<&str>) -> Result<Self> {
        let (ar, namespaced) = find_api_resource(client.clone(), gvk).await?;
        Ok(Self::new(api_for(client, &ar, namespaced, namespace), ar))
    }
}

#[async_trait::async_trait]
impl ObjectGetter for KubeGetter {
    async fn get(&self, ctx: &Context, name: &str) -> Result<ResourceSnapshot, GetError> {
        let res = tokio::select! {
            res = self.api.get(name) => res,
            _ = ctx.done() => {
                let err = ctx.err().map(anyhow::Error::from).unwrap_or_else(|| anyhow!("context done"));
                return Err(GetError::Other(err.context(format!("getting {}", name))));
            }
        };
        match res {
            Ok(obj) => Ok(snapshot_from(&obj, &self.resource)?),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(GetError::NotFound(name.to_string())),
            Err(err) => Err(GetError::Other(anyhow::Error::new(err).context(format!("getting {}", name)))),
        }
    }
}

/// Informer factories keyed by namespace, sharing one client. The empty key
/// is the cluster-wide factory.
pub struct Factories {
    client: Client,
    factories: Mutex<FxHashMap<String, Arc<InformerFactory>>>,
}

impl Factories {
    pub fn new(client: Client) -> Self { Self { client, factories: Mutex::new(FxHashMap::default()) } }

    pub fn client(&self) -> &Client { &self.client }

    pub fn for_namespace(&self, namespace: Option<&str>) -> Arc<InformerFactory> {
        let key = namespace.unwrap_or("").to_string();
        let mut factories = self.factories.lock().unwrap_or_else(|p| p.into_inner());
        factories
            .entry(key)
            .or_insert_with(|| {
                debug!(namespace = ?namespace, "creating informer factory");
                Arc::new(InformerFactory::new(self.client.clone(), namespace.map(str::to_string)))
            })
            .clone()
    }

    /// Shut down every factory created so far.
    pub fn shutdown(&self) {
        let factories = std::mem::take(&mut *self.factories.lock().unwrap_or_else(|p| p.into_inner()));
        for factory in factories.values() {
            factory.shutdown();
        }
    }
}
