//! Long-term memory shared across sessions
//!
//! Checkpoints hold the state of one session. A [`Store`] holds values that
//! outlive sessions, such as a user's profile or todo list, addressed by a
//! hierarchical namespace plus a key:
//!
//! ```text
//! ("todo", "work", "user-1")  /  "3f2a..."  ->  {"task": "File taxes", ...}
//! ("profile", "work", "user-1")  /  "main"  ->  {"name": "Lance", ...}
//! ```
//!
//! Nodes reach the store of the graph they run in through
//! [`get_store`](crate::runtime::get_store).
//!
//! # Example
//!
//! ```rust,no_run
//! use stategraph_core::store::{namespace, InMemoryStore, Store};
//! use serde_json::json;
//!
//! # async fn demo() -> stategraph_core::store::StoreResult<()> {
//! let store = InMemoryStore::new();
//! let todos = namespace(["todo", "work", "user-1"]);
//!
//! store.put(&todos, "taxes", json!({"task": "File taxes"})).await?;
//! let items = store.search(&todos, None).await?;
//! assert_eq!(items[0].value["task"], "File taxes");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Path of labels grouping related items, most general first
pub type Namespace = Vec<String>;

/// Build a [`Namespace`] from its labels
pub fn namespace<I, S>(labels: I) -> Namespace
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    labels.into_iter().map(Into::into).collect()
}

/// Error type for Store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Namespace is empty or has an empty label
    #[error("Invalid namespace {0:?}")]
    InvalidNamespace(Namespace),

    /// Key is empty
    #[error("Empty key in namespace {0:?}")]
    EmptyKey(Namespace),

    /// Backend failure
    #[error("Store error: {0}")]
    Backend(String),
}

/// Result type for Store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored value with its address and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key-value storage shared by every session of a graph
///
/// Implementations must be safe to call from concurrent branches.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the value at `namespace` / `key`
    ///
    /// Replacing keeps the item's `created_at`.
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> StoreResult<()>;

    /// The item at `namespace` / `key`, if any
    async fn get(&self, namespace: &[String], key: &str) -> StoreResult<Option<Item>>;

    /// Items whose namespace starts with `prefix`, ordered by namespace then key
    async fn search(&self, prefix: &[String], limit: Option<usize>) -> StoreResult<Vec<Item>>;

    /// Remove an item; returns whether it existed
    async fn delete(&self, namespace: &[String], key: &str) -> StoreResult<bool>;

    /// Distinct namespaces that start with `prefix`, sorted
    async fn list_namespaces(&self, prefix: &[String]) -> StoreResult<Vec<Namespace>>;
}

fn check_address(namespace: &[String], key: &str) -> StoreResult<()> {
    if namespace.is_empty() || namespace.iter().any(String::is_empty) {
        return Err(StoreError::InvalidNamespace(namespace.to_vec()));
    }
    if key.is_empty() {
        return Err(StoreError::EmptyKey(namespace.to_vec()));
    }
    Ok(())
}

/// In-memory implementation of [`Store`]
///
/// Clones share the same data. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    items: Arc<RwLock<BTreeMap<(Namespace, String), Item>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> StoreResult<()> {
        check_address(namespace, key)?;
        let now = Utc::now();
        let mut items = self.items.write().await;
        let address = (namespace.to_vec(), key.to_string());
        let created_at = items.get(&address).map_or(now, |item| item.created_at);
        items.insert(
            address,
            Item {
                namespace: namespace.to_vec(),
                key: key.to_string(),
                value,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, namespace: &[String], key: &str) -> StoreResult<Option<Item>> {
        check_address(namespace, key)?;
        let items = self.items.read().await;
        Ok(items.get(&(namespace.to_vec(), key.to_string())).cloned())
    }

    async fn search(&self, prefix: &[String], limit: Option<usize>) -> StoreResult<Vec<Item>> {
        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| item.namespace.starts_with(prefix))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> StoreResult<bool> {
        check_address(namespace, key)?;
        let mut items = self.items.write().await;
        Ok(items.remove(&(namespace.to_vec(), key.to_string())).is_some())
    }

    async fn list_namespaces(&self, prefix: &[String]) -> StoreResult<Vec<Namespace>> {
        let items = self.items.read().await;
        let mut namespaces: Vec<Namespace> = items
            .keys()
            .map(|(namespace, _)| namespace)
            .filter(|namespace| namespace.starts_with(prefix))
            .cloned()
            .collect();
        namespaces.dedup();
        Ok(namespaces)
    }
}
