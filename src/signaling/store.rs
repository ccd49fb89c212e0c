//! Signaling store bindings
//!
//! The call rendezvous point is a shared tree of JSON values addressed by
//! slash-separated paths. [`RestStore`] binds to a Firebase-style REST
//! interface (`PUT`/`POST`/`GET` on `{base}/{path}.json`); [`MemoryStore`]
//! keeps the tree in memory for tests and single-process setups.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Shared key/value tree used for call signaling
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Write `value` at `path`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure.
    async fn put(&self, path: &str, value: Value) -> Result<()>;

    /// Append `value` under `path` with a store-generated key; keys sort in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure.
    async fn push(&self, path: &str, value: Value) -> Result<String>;

    /// Read the value at `path`; `Null` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure.
    async fn get(&self, path: &str) -> Result<Value>;
}

/// REST binding for a Firebase-style realtime database
pub struct RestStore {
    base: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Create a binding for the given base URL
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}.json", self.base)
    }
}

#[async_trait]
impl SignalStore for RestStore {
    async fn put(&self, path: &str, value: Value) -> Result<()> {
        self.client
            .put(self.url(path))
            .json(&value)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let response: Value = self
            .client
            .post(self.url(path))
            .json(&value)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| Error::Signaling("push response missing key name".to_string()))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// In-memory store for tests and single-process setups
#[derive(Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    counter: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            counter: AtomicU64::new(0),
        }
    }
}

/// Navigate to the object at `path`, creating intermediate objects
fn descend<'a>(root: &'a mut Value, path: &str) -> &'a mut Map<String, Value> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut().expect("just ensured object")
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn put(&self, path: &str, value: Value) -> Result<()> {
        let mut root = self.root.lock().await;
        let (parent, key) = path.rsplit_once('/').unwrap_or(("", path));
        descend(&mut root, parent).insert(key.to_string(), value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let id = format!("k{:012}", self.counter.fetch_add(1, Ordering::SeqCst));
        let mut root = self.root.lock().await;
        descend(&mut root, path).insert(id.clone(), value);
        Ok(id)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let root = self.root.lock().await;
        let mut node = &*root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match node.get(segment) {
                Some(next) => node = next,
                None => return Ok(Value::Null),
            }
        }
        Ok(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_and_get_nested_paths() {
        let store = MemoryStore::new();
        store
            .put("videocall/abc/offer", json!({ "sdp": "v=0" }))
            .await
            .unwrap();

        let offer = store.get("videocall/abc/offer").await.unwrap();
        assert_eq!(offer["sdp"], "v=0");

        let tree = store.get("videocall").await.unwrap();
        assert!(tree["abc"]["offer"].is_object());
    }

    #[tokio::test]
    async fn missing_path_reads_null() {
        let store = MemoryStore::new();
        assert_eq!(store.get("videocall/nope").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn push_keys_sort_in_arrival_order() {
        let store = MemoryStore::new();
        let a = store.push("list", json!(1)).await.unwrap();
        let b = store.push("list", json!(2)).await.unwrap();
        let c = store.push("list", json!(3)).await.unwrap();
        assert!(a < b && b < c);

        // serde_json maps iterate in sorted key order, matching arrival
        let tree = store.get("list").await.unwrap();
        let keys: Vec<&String> = tree.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec![&a, &b, &c]);
    }

    #[tokio::test]
    async fn put_replaces_existing_value() {
        let store = MemoryStore::new();
        store.put("call/status", json!("calling")).await.unwrap();
        store.put("call/status", json!("connected")).await.unwrap();
        assert_eq!(store.get("call/status").await.unwrap(), "connected");
    }
}
