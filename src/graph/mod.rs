//! The memory graph: a reasoning node that may request one memory update,
//! three update nodes, and a router that loops updates back to reasoning.
//!
//! ```text
//! human ─► reason ─┬─► end
//!            ▲     ├─► update_profile ──┐
//!            │     ├─► update_todos ────┤
//!            │     └─► update_instructions
//!            └──────────────────────────┘
//! ```

pub mod nodes;
pub mod prompts;
pub mod router;

use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::providers::LlmProvider;
use crate::checkpoint::{Checkpointer, InMemoryCheckpointer};
use crate::config::GraphConfig;
use crate::extract::{Extractor, LlmExtractor};
use crate::memory::{InMemoryStore, MemoryStore};
use crate::types::Message;
use router::{Route, UpdateType};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("unknown update type: {0}")]
    UnknownUpdateType(String),
    #[error("unexpected tool call: {0}")]
    UnexpectedTool(String),
    #[error("missing config field: configurable.{0}")]
    MissingConfig(&'static str),
    #[error("invalid {category} document: {reason}")]
    InvalidDocument {
        category: &'static str,
        reason: String,
    },
    #[error("model returned no reply text")]
    EmptyReply,
}

/// Per-invocation settings taken from the request's config blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub user_id: String,
    pub thread_id: String,
}

impl RunConfig {
    /// Read `configurable.user_id` and `configurable.thread_id`.
    pub fn from_value(config: &serde_json::Value) -> Result<Self, GraphError> {
        let field = |name: &'static str| {
            config
                .get("configurable")
                .and_then(|c| c.get(name))
                .and_then(|v| match v {
                    serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or(GraphError::MissingConfig(name))
        };

        Ok(Self {
            user_id: field("user_id")?,
            thread_id: field("thread_id")?,
        })
    }
}

/// Messages produced by one invocation, in order. Excludes the human turn.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub messages: Vec<Message>,
    pub update_rounds: u32,
}

impl RunOutcome {
    /// Non-empty message contents, space-joined.
    pub fn response_text(&self) -> String {
        self.messages
            .iter()
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct MemoryGraph {
    provider: Arc<dyn LlmProvider>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn MemoryStore>,
    checkpointer: Arc<dyn Checkpointer>,
    config: GraphConfig,
}

impl MemoryGraph {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn MemoryStore>,
        checkpointer: Arc<dyn Checkpointer>,
        config: GraphConfig,
    ) -> Self {
        Self {
            provider,
            extractor,
            store,
            checkpointer,
            config,
        }
    }

    /// Graph with process-local stores and an extractor on the same model.
    pub fn in_memory(provider: Arc<dyn LlmProvider>, config: GraphConfig) -> Self {
        let extractor = Arc::new(LlmExtractor::new(Arc::clone(&provider)));
        Self::new(
            provider,
            extractor,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCheckpointer::new()),
            config,
        )
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Drive one inbound message through the graph until the model answers
    /// without a tool call.
    ///
    /// The thread only records the run if it completes; a failed run leaves
    /// the history as it was.
    pub async fn invoke(&self, run: &RunConfig, input: Message) -> anyhow::Result<RunOutcome> {
        let mut messages = self.checkpointer.read(&run.thread_id).await?;
        let prior_len = messages.len();
        messages.push(input);

        info!(
            user_id = %run.user_id,
            thread_id = %run.thread_id,
            history = prior_len,
            "graph run started"
        );

        let mut rounds = 0u32;
        loop {
            let offer_updates = rounds < self.config.max_update_rounds;
            let reply = nodes::reason(self, &run.user_id, &messages, offer_updates).await?;
            let route = router::route(&reply)?;
            messages.push(reply);

            let (update_type, call_id) = match route {
                Route::End => break,
                Route::Update {
                    update_type,
                    call_id,
                } => (update_type, call_id),
            };

            debug!(%update_type, round = rounds + 1, "routing to update node");
            // The triggering tool call is not part of the conversation.
            let conversation = &messages[..messages.len() - 1];
            let result = match update_type {
                UpdateType::User => {
                    nodes::update_profile(self, &run.user_id, conversation, &call_id).await?
                }
                UpdateType::Todo => {
                    nodes::update_todos(self, &run.user_id, conversation, &call_id).await?
                }
                UpdateType::Instructions => {
                    nodes::update_instructions(self, &run.user_id, conversation, &call_id).await?
                }
            };
            messages.push(result);
            rounds += 1;
        }

        let produced = &messages[prior_len..];
        self.checkpointer.append(&run.thread_id, produced).await?;

        info!(
            thread_id = %run.thread_id,
            update_rounds = rounds,
            messages = produced.len(),
            "graph run finished"
        );

        Ok(RunOutcome {
            messages: produced[1..].to_vec(),
            update_rounds: rounds,
        })
    }
}
