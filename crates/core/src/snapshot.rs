use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Group/Version/Kind identifier of a resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Split an `apiVersion` (`v1` or `apps/v1`) and pair it with a kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Parse a key of the form `v1/Kind` or `group/v1/Kind`.
    pub fn parse_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new(*group, *version, *kind)),
            _ => None,
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// One immutable revision of a cluster object.
///
/// The payload is shared behind an `Arc`; a newer revision replaces the whole
/// snapshot instead of mutating it.
#[derive(Clone, PartialEq)]
pub struct ResourceSnapshot(Arc<Value>);

impl Default for ResourceSnapshot {
    fn default() -> Self { Self(Arc::new(Value::Object(Default::default()))) }
}

impl fmt::Debug for ResourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&*self.0, f) }
}

impl From<Value> for ResourceSnapshot {
    fn from(v: Value) -> Self { Self(Arc::new(v)) }
}

impl Serialize for ResourceSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { self.0.serialize(serializer) }
}

impl<'de> Deserialize<'de> for ResourceSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

impl ResourceSnapshot {
    pub fn new(v: Value) -> Self { Self::from(v) }

    pub fn value(&self) -> &Value { &self.0 }

    /// Whether the payload looks like an object at all (a JSON map).
    pub fn is_object(&self) -> bool { self.0.is_object() }

    /// Nested field lookup. `None` is the not-found sentinel; lookups never panic
    /// on unexpected shapes.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut cur = &*self.0;
        for key in path {
            cur = cur.as_object()?.get(*key)?;
        }
        Some(cur)
    }

    pub fn get_str(&self, path: &[&str]) -> Option<&str> { self.get(path).and_then(Value::as_str) }

    pub fn get_i64(&self, path: &[&str]) -> Option<i64> { self.get(path).and_then(Value::as_i64) }

    pub fn gvk(&self) -> Gvk {
        let api_version = self.get_str(&["apiVersion"]).unwrap_or("");
        let kind = self.get_str(&["kind"]).unwrap_or("");
        Gvk::from_api_version(api_version, kind)
    }

    pub fn name(&self) -> &str { self.get_str(&["metadata", "name"]).unwrap_or("") }

    pub fn namespace(&self) -> Option<&str> { self.get_str(&["metadata", "namespace"]).filter(|s| !s.is_empty()) }

    pub fn uid(&self) -> &str { self.get_str(&["metadata", "uid"]).unwrap_or("") }

    /// `metadata.generation`, 0 when absent.
    pub fn generation(&self) -> i64 { self.get_i64(&["metadata", "generation"]).unwrap_or(0) }

    /// `metadata.resourceVersion`, empty when absent.
    pub fn resource_version(&self) -> &str { self.get_str(&["metadata", "resourceVersion"]).unwrap_or("") }

    pub fn deletion_timestamp(&self) -> Option<&str> { self.get_str(&["metadata", "deletionTimestamp"]) }

    pub fn finalizers(&self) -> Vec<&str> {
        self.get(&["metadata", "finalizers"])
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn owner_uids(&self) -> Vec<&str> {
        self.get(&["metadata", "ownerReferences"])
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|r| r.get("uid").and_then(Value::as_str)).collect())
            .unwrap_or_default()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> { self.get(&["metadata", "annotations", key]).and_then(Value::as_str) }

    /// Whether any owner reference points at `owner`'s UID.
    pub fn is_owned_by(&self, owner: &ResourceSnapshot) -> bool {
        let uid = owner.uid();
        if uid.is_empty() {
            return false;
        }
        self.owner_uids().into_iter().any(|u| u == uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gvk_key_roundtrip_core_and_group() {
        let core = Gvk::parse_key("v1/ConfigMap").expect("ok");
        assert_eq!(core, Gvk::new("", "v1", "ConfigMap"));
        assert_eq!(core.to_string(), "v1/ConfigMap");
        let apps = Gvk::parse_key("apps/v1/Deployment").expect("ok");
        assert_eq!(apps.api_version(), "apps/v1");
        assert!(Gvk::parse_key("invalid").is_none());
        assert!(Gvk::parse_key("a/b/c/d").is_none());
    }

    #[test]
    fn accessors_tolerate_missing_and_odd_shapes() {
        let s = ResourceSnapshot::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "generation": 3,
                "resourceVersion": "42",
                "finalizers": ["a", "b"],
                "ownerReferences": [{"uid": "owner-1"}],
                "annotations": {"x": "y"}
            },
            "status": "not-a-map"
        }));
        assert_eq!(s.gvk(), Gvk::new("apps", "v1", "Deployment"));
        assert_eq!(s.name(), "web");
        assert_eq!(s.namespace(), Some("prod"));
        assert_eq!(s.generation(), 3);
        assert_eq!(s.resource_version(), "42");
        assert_eq!(s.finalizers(), vec!["a", "b"]);
        assert_eq!(s.owner_uids(), vec!["owner-1"]);
        assert_eq!(s.annotation("x"), Some("y"));
        assert!(s.get(&["status", "conditions"]).is_none());

        let empty = ResourceSnapshot::default();
        assert_eq!(empty.generation(), 0);
        assert_eq!(empty.resource_version(), "");
        assert!(empty.finalizers().is_empty());
    }
}
