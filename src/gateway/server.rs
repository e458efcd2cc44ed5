use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::TaskmasterConfig;
use crate::graph::{MemoryGraph, RunConfig};
use crate::types::Message;

pub struct AppState {
    pub graph: MemoryGraph,
    /// Per-thread locks so runs on one thread never interleave.
    pub thread_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(graph: MemoryGraph) -> Self {
        Self {
            graph,
            thread_locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.thread_locks.read().await;
            if let Some(lock) = locks.get(thread_id) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.thread_locks.write().await;
        Arc::clone(
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Hand back a lock taken with [`thread_lock`](Self::thread_lock).
    /// The entry is dropped once no other run holds or waits on it.
    pub async fn release_thread_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.thread_locks.write().await;
        let idle = locks
            .get(thread_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(thread_id);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub config: serde_json::Value,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Error body for every failed chat request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Every failure on `/chat` is a 500 carrying the error text.
pub struct ChatError(anyhow::Error);

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let detail = format!("{:#}", self.0);
        warn!("chat request failed: {detail}");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorDetail { detail })).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ChatError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Build the HTTP application around a graph.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::very_permissive()),
        )
        .with_state(state)
}

/// Start the gateway with the configured provider and in-memory stores.
pub async fn run(config: TaskmasterConfig) -> anyhow::Result<()> {
    let is_loopback = config.gateway.bind == "127.0.0.1" || config.gateway.bind == "::1";

    let provider = crate::agent::providers::from_config(&config.agent)?;
    info!(
        provider = %config.agent.provider,
        model = %config.agent.model,
        max_update_rounds = config.graph.max_update_rounds,
        "graph configured"
    );

    let graph = MemoryGraph::in_memory(Arc::from(provider), config.graph.clone());
    let state = Arc::new(AppState::new(graph));

    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("taskmaster gateway listening on {addr}");
    if is_loopback {
        info!("bound to loopback, local access only");
    } else {
        warn!("bound to {addr}, /chat is unauthenticated");
    }

    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Handle one chat turn.
///
/// 1. Parse the body (malformed bodies are server errors too)
/// 2. Resolve user and thread from `config.configurable`
/// 3. Run the graph to completion under the thread lock
/// 4. Join the emitted non-human contents
async fn chat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ChatError> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| anyhow::anyhow!("invalid chat request: {e}"))?;
    let run = RunConfig::from_value(&request.config)?;

    let thread_lock = state.thread_lock(&run.thread_id).await;
    let outcome = {
        let _thread_guard = thread_lock.lock().await;
        state
            .graph
            .invoke(&run, Message::human(request.message))
            .await
    };
    state.release_thread_lock(&run.thread_id, thread_lock).await;
    let outcome = outcome?;

    Ok(Json(ChatResponse {
        response: outcome.response_text(),
    }))
}
