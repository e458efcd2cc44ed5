pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Kind of long-term memory a namespace holds.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Profile,
    Todo,
    Instructions,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Profile => "profile",
            MemoryCategory::Todo => "todo",
            MemoryCategory::Instructions => "instructions",
        }
    }
}

/// A `(category, user_id)` pair scoping stored documents.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub category: MemoryCategory,
    pub user_id: String,
}

impl Namespace {
    pub fn new(category: MemoryCategory, user_id: impl Into<String>) -> Self {
        Self {
            category,
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.as_str(), self.user_id)
    }
}

/// Key of a document within a namespace.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for a newly created document.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: DocumentId,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Long-term key-value memory shared across threads.
///
/// Implementations must serialize writes per key; callers do no locking.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, namespace: &Namespace, key: &DocumentId) -> anyhow::Result<Option<Item>>;

    /// Insert or overwrite the document at `key`.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &DocumentId,
        value: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// All documents in a namespace, oldest first.
    async fn search(&self, namespace: &Namespace) -> anyhow::Result<Vec<Item>>;
}

/// Process-local store. Lives as long as the process.
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<Namespace, BTreeMap<DocumentId, Item>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents across all namespaces.
    pub async fn count(&self) -> usize {
        self.namespaces.read().await.values().map(|docs| docs.len()).sum()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, namespace: &Namespace, key: &DocumentId) -> anyhow::Result<Option<Item>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &DocumentId,
        value: serde_json::Value,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut namespaces = self.namespaces.write().await;
        let docs = namespaces.entry(namespace.clone()).or_default();

        match docs.get_mut(key) {
            Some(item) => {
                item.value = value;
                item.updated_at = now;
            }
            None => {
                docs.insert(
                    key.clone(),
                    Item {
                        namespace: namespace.clone(),
                        key: key.clone(),
                        value,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        debug!(%namespace, %key, "stored document");
        Ok(())
    }

    async fn search(&self, namespace: &Namespace) -> anyhow::Result<Vec<Item>> {
        let namespaces = self.namespaces.read().await;
        let mut items: Vec<Item> = namespaces
            .get(namespace)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }
}
