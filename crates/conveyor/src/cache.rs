//! Shared key/value caches.
//!
//! Two cache scopes exist. The pipeline cache is created empty per pipeline
//! invocation and is visible to every task of every module; host caches are
//! one per host per invocation and visible only to tasks targeting that
//! host. Keys are partitioned by task-suite convention; a lookup of a key
//! that was never written surfaces [`Error::Internal`].

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A string-keyed map of JSON values shared across tasks.
#[derive(Debug, Default)]
pub struct Cache {
    map: Mutex<HashMap<String, Value>>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::Internal(format!("cache value for '{key}' not serializable: {e}")))?;
        self.map.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch and deserialize the value under `key`, if present.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.map.lock().unwrap().get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::Internal(format!("cache value for '{key}' has wrong shape: {e}"))),
        }
    }

    /// Fetch the value under `key`, failing if it was never written.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| Error::Internal(format!("missing cache key '{key}'")))
    }

    /// Whether `key` has been written.
    pub fn contains(&self, key: &str) -> bool {
        self.map.lock().unwrap().contains_key(key)
    }

    /// Remove the value under `key`.
    pub fn remove(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }
}

/// Lazily-created per-host caches for one pipeline invocation.
#[derive(Debug, Default)]
pub struct HostCaches {
    map: Mutex<HashMap<String, Arc<Cache>>>,
}

impl HostCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `host`, created on first access.
    pub fn for_host(&self, host: &str) -> Arc<Cache> {
        self.map
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        version: String,
        node_token: Option<String>,
    }

    #[test]
    fn test_set_get_roundtrip() {
        let cache = Cache::new();
        cache
            .set(
                "cluster-status",
                Snapshot {
                    version: "v1.29.2".into(),
                    node_token: None,
                },
            )
            .unwrap();

        let got: Snapshot = cache.require("cluster-status").unwrap();
        assert_eq!(got.version, "v1.29.2");
    }

    #[test]
    fn test_missing_key_is_internal_error() {
        let cache = Cache::new();
        let err = cache.require::<String>("nope").unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("missing cache key 'nope'"));
    }

    #[test]
    fn test_get_missing_is_none() {
        let cache = Cache::new();
        assert_eq!(cache.get::<String>("nope").unwrap(), None);
        assert!(!cache.contains("nope"));
    }

    #[test]
    fn test_host_caches_are_distinct() {
        let caches = HostCaches::new();
        caches.for_host("n1").set("probe", true).unwrap();
        assert!(caches.for_host("n1").contains("probe"));
        assert!(!caches.for_host("n2").contains("probe"));
    }

    #[test]
    fn test_host_cache_is_stable_across_lookups() {
        let caches = HostCaches::new();
        let first = caches.for_host("n1");
        first.set("k", 1).unwrap();
        let second = caches.for_host("n1");
        assert_eq!(second.require::<i32>("k").unwrap(), 1);
    }
}
