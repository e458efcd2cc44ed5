use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts::{self, fill};
use super::router::update_tool_spec;
use super::{GraphError, MemoryGraph};
use crate::agent::{self, CompletionRequest};
use crate::extract::{self, ExtractRequest, ExtractedDoc};
use crate::memory::schema::{INSTRUCTIONS_KEY, Instructions, Profile, Todo};
use crate::memory::{DocumentId, MemoryCategory, MemoryStore, Namespace};
use crate::types::{Message, ToolChoice};

const PROFILE_ACK: &str = "updated profile";
const INSTRUCTIONS_ACK: &str = "updated instructions";

/// Render the reasoning system prompt from the user's current memory.
pub async fn build_reasoning_prompt(
    store: &dyn MemoryStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let profile = store
        .search(&Namespace::new(MemoryCategory::Profile, user_id))
        .await?
        .into_iter()
        .next()
        .map(|item| match Profile::from_value(&item.value) {
            Ok(profile) => profile.render(),
            Err(_) => item.value.to_string(),
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let todos = store
        .search(&Namespace::new(MemoryCategory::Todo, user_id))
        .await?
        .iter()
        .map(|item| item.value.to_string())
        .collect::<Vec<_>>()
        .join("\n");

    let instructions = load_instructions(store, user_id).await?;
    let time = now.format("%Y-%m-%d %H:%M:%S UTC").to_string();

    Ok(fill(
        prompts::REASONING_SYSTEM,
        &[
            ("user_profile", profile.as_str()),
            ("todo", todos.as_str()),
            ("instructions", instructions.as_str()),
            ("time", time.as_str()),
        ],
    ))
}

/// Reasoning node: answer the user or request exactly one memory update.
pub(super) async fn reason(
    graph: &MemoryGraph,
    user_id: &str,
    messages: &[Message],
    offer_updates: bool,
) -> anyhow::Result<Message> {
    let prompt = build_reasoning_prompt(graph.store.as_ref(), user_id, Utc::now()).await?;
    let tools = [update_tool_spec()];
    let completion = agent::complete(
        graph.provider.as_ref(),
        &CompletionRequest {
            system_prompt: Some(&prompt),
            messages,
            tools: &tools,
            tool_choice: if offer_updates {
                ToolChoice::Auto
            } else {
                ToolChoice::None
            },
            parallel_tool_calls: false,
        },
    )
    .await?;

    let mut calls = completion.tool_calls.into_iter();
    match calls.next() {
        Some(call) if offer_updates => {
            if calls.len() > 0 {
                warn!(dropped = calls.len(), "model returned parallel tool calls, keeping the first");
            }
            if !completion.text.is_empty() {
                debug!("dropping text that accompanied a tool call");
            }
            Ok(Message::tool_use(call))
        }
        Some(call) => {
            warn!(tool = %call.name, "update round limit reached, ignoring tool call");
            final_reply(completion.text)
        }
        None => final_reply(completion.text),
    }
}

/// A turn that ends the run must carry text; blank turns are never committed.
fn final_reply(text: String) -> anyhow::Result<Message> {
    if text.trim().is_empty() {
        return Err(GraphError::EmptyReply.into());
    }
    Ok(Message::assistant(text))
}

/// Update-profile node. Profile changes are not narrated to the user.
pub(super) async fn update_profile(
    graph: &MemoryGraph,
    user_id: &str,
    conversation: &[Message],
    call_id: &str,
) -> anyhow::Result<Message> {
    let namespace = Namespace::new(MemoryCategory::Profile, user_id);
    let existing = existing_docs(graph.store.as_ref(), &namespace).await?;
    let instruction = extraction_instruction();

    let docs = graph
        .extractor
        .extract(ExtractRequest {
            instruction: &instruction,
            messages: conversation,
            schema: &Profile::tool_spec(),
            existing: &existing,
            enable_inserts: false,
        })
        .await?;

    // One profile per user; a later document supersedes an earlier one.
    if docs.len() > 1 {
        warn!(count = docs.len(), "extractor returned several profiles, keeping the last");
    }
    let docs: Vec<ExtractedDoc> = docs.into_iter().last().into_iter().collect();

    persist(graph.store.as_ref(), &namespace, docs, |value| {
        Profile::from_value(value).and_then(|p| serde_json::to_value(p).map_err(|e| e.to_string()))
    })
    .await?;

    Ok(Message::tool_result(call_id, PROFILE_ACK))
}

/// Update-todo node. Reports each created or patched item.
pub(super) async fn update_todos(
    graph: &MemoryGraph,
    user_id: &str,
    conversation: &[Message],
    call_id: &str,
) -> anyhow::Result<Message> {
    let namespace = Namespace::new(MemoryCategory::Todo, user_id);
    let existing = existing_docs(graph.store.as_ref(), &namespace).await?;
    let instruction = extraction_instruction();

    let docs = graph
        .extractor
        .extract(ExtractRequest {
            instruction: &instruction,
            messages: conversation,
            schema: &Todo::tool_spec(),
            existing: &existing,
            enable_inserts: true,
        })
        .await?;

    let stored = persist(graph.store.as_ref(), &namespace, docs, |value| {
        Todo::from_value(value).and_then(|t| serde_json::to_value(t).map_err(|e| e.to_string()))
    })
    .await?;

    Ok(Message::tool_result(
        call_id,
        extract::summarize_changes(Todo::TOOL_NAME, &stored),
    ))
}

/// Update-instructions node. The stored text is replaced, never merged.
pub(super) async fn update_instructions(
    graph: &MemoryGraph,
    user_id: &str,
    conversation: &[Message],
    call_id: &str,
) -> anyhow::Result<Message> {
    let current = load_instructions(graph.store.as_ref(), user_id).await?;
    let system = fill(
        prompts::INSTRUCTIONS_UPDATE,
        &[("current_instructions", current.as_str())],
    );

    let mut messages = extract::text_only(conversation);
    messages.push(Message::human(prompts::INSTRUCTIONS_REQUEST));

    let completion = agent::complete(
        graph.provider.as_ref(),
        &CompletionRequest::text(Some(&system), &messages),
    )
    .await?;

    let value = serde_json::to_value(Instructions {
        memory: completion.text,
    })?;
    graph
        .store
        .put(
            &Namespace::new(MemoryCategory::Instructions, user_id),
            &DocumentId::new(INSTRUCTIONS_KEY),
            value,
        )
        .await?;
    info!(user_id, "instructions replaced");

    Ok(Message::tool_result(call_id, INSTRUCTIONS_ACK))
}

fn extraction_instruction() -> String {
    let time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    fill(prompts::EXTRACTION_INSTRUCTION, &[("time", time.as_str())])
}

async fn existing_docs(
    store: &dyn MemoryStore,
    namespace: &Namespace,
) -> anyhow::Result<Vec<(DocumentId, Value)>> {
    Ok(store
        .search(namespace)
        .await?
        .into_iter()
        .map(|item| (item.key, item.value))
        .collect())
}

async fn load_instructions(store: &dyn MemoryStore, user_id: &str) -> anyhow::Result<String> {
    let item = store
        .get(
            &Namespace::new(MemoryCategory::Instructions, user_id),
            &DocumentId::new(INSTRUCTIONS_KEY),
        )
        .await?;
    Ok(item
        .and_then(|item| serde_json::from_value::<Instructions>(item.value).ok())
        .map(|i| i.memory)
        .unwrap_or_default())
}

/// Validate, assign ids and write every extracted document. Returns what
/// was stored, keyed by the id it was stored under.
async fn persist(
    store: &dyn MemoryStore,
    namespace: &Namespace,
    docs: Vec<ExtractedDoc>,
    normalize: impl Fn(&Value) -> Result<Value, String>,
) -> anyhow::Result<Vec<(DocumentId, ExtractedDoc)>> {
    // Validate everything before the first write.
    let docs = docs
        .into_iter()
        .map(|mut doc| -> Result<ExtractedDoc, GraphError> {
            doc.value = normalize(&doc.value).map_err(|reason| GraphError::InvalidDocument {
                category: namespace.category.as_str(),
                reason,
            })?;
            Ok(doc)
        })
        .collect::<Result<Vec<_>, GraphError>>()?;

    let mut stored = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.id.clone().unwrap_or_else(DocumentId::generate);
        store.put(namespace, &id, doc.value.clone()).await?;
        debug!(%namespace, %id, value = %doc.value, "persisted document");
        stored.push((id, doc));
    }

    Ok(stored)
}
