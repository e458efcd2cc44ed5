use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::Message;

/// Per-thread conversation history that survives across invocations.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Full history of a thread; empty for an unknown thread.
    async fn read(&self, thread_id: &str) -> anyhow::Result<Vec<Message>>;

    /// Append messages to a thread, creating it if needed.
    async fn append(&self, thread_id: &str, messages: &[Message]) -> anyhow::Result<()>;
}

/// Simple in-memory checkpointer. Stores conversation history per thread id
/// for the lifetime of the process.
pub struct InMemoryCheckpointer {
    threads: RwLock<HashMap<String, Thread>>,
}

#[derive(Clone)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of a thread, if it exists.
    pub async fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.read().await.get(thread_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.threads.read().await.len()
    }
}

impl Default for InMemoryCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn read(&self, thread_id: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .map(|t| t.messages.clone())
            .unwrap_or_default())
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        let now = chrono::Utc::now();
        let mut threads = self.threads.write().await;
        let thread = threads.entry(thread_id.into()).or_insert_with(|| Thread {
            id: thread_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        thread.messages.extend_from_slice(messages);
        thread.updated_at = now;
        Ok(())
    }
}
