//! Cross-run key-value store.
//!
//! Node-authored durable memory that outlives any single run: namespaced
//! JSON values behind an async trait. The engine injects the store into
//! [`NodeContext`](crate::graph::NodeContext) and never interprets its
//! contents.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque namespaced KV surface for node-authored memory.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Value>>;

    async fn put(&self, namespace: &str, key: &str, value: Value) -> StoreResult<()>;

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;

    /// Keys currently present in a namespace, sorted.
    async fn list(&self, namespace: &str) -> StoreResult<Vec<String>>;
}

/// Process-local store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Value>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        let mut keys: Vec<String> = namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
