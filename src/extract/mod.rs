//! Structured extraction: turn a conversation into schema-shaped documents,
//! either brand new or patches against documents that already exist.

pub mod patch;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::{self, CompletionRequest, providers::LlmProvider};
use crate::memory::DocumentId;
use crate::types::{Message, MessageContent, ToolChoice, ToolSpec};
pub use patch::{PatchKind, PatchOp};

/// Name of the tool used to patch an existing document.
pub const PATCH_TOOL: &str = "PatchDoc";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extractor returned no tool call")]
    NoToolCall,
    #[error("patch references unknown document '{0}'")]
    UnknownDocument(String),
    #[error("invalid patch for document '{id}': {reason}")]
    InvalidPatch { id: String, reason: String },
    #[error("malformed {tool} arguments: {reason}")]
    MalformedArguments { tool: String, reason: String },
    #[error("extractor called unexpected tool '{0}'")]
    UnexpectedTool(String),
}

/// Input to one extraction.
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub instruction: &'a str,
    pub messages: &'a [Message],
    pub schema: &'a ToolSpec,
    /// Documents already stored, as `(id, value)` pairs.
    pub existing: &'a [(DocumentId, Value)],
    /// Whether new documents may be created alongside patches.
    pub enable_inserts: bool,
}

/// How an extracted document came to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    New,
    Patched {
        planned_edits: String,
        patches: Vec<PatchOp>,
    },
}

/// A document produced by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDoc {
    /// Id of the patched document; `None` for a new one.
    pub id: Option<DocumentId>,
    pub value: Value,
    pub change: Change,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: ExtractRequest<'_>) -> anyhow::Result<Vec<ExtractedDoc>>;
}

/// Arguments of the [`PATCH_TOOL`] call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PatchDocArgs {
    #[schemars(description = "The id of the document to patch")]
    pub json_doc_id: String,
    #[schemars(description = "What will change and why")]
    pub planned_edits: String,
    #[schemars(description = "JSON patch (RFC 6902) operations that apply the planned edits")]
    pub patches: Vec<PatchOp>,
}

/// Extractor backed by a tool-calling language model.
pub struct LlmExtractor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn system_prompt(request: &ExtractRequest<'_>, offer_schema: bool) -> String {
        let mut prompt = request.instruction.to_string();

        if !request.existing.is_empty() {
            prompt.push_str(&format!(
                "\n\nExisting {} documents. To change one, call {PATCH_TOOL} with its json_doc_id, \
                 your planned edits and JSON patch operations:\n<existing>\n",
                request.schema.name
            ));
            for (id, value) in request.existing {
                prompt.push_str(&format!("{id}: {value}\n"));
            }
            prompt.push_str("</existing>");
        }

        if offer_schema {
            prompt.push_str(&format!(
                "\n\nCall {} once for every new document to create.",
                request.schema.name
            ));
        }

        prompt
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, request: ExtractRequest<'_>) -> anyhow::Result<Vec<ExtractedDoc>> {
        let offer_schema = request.enable_inserts || request.existing.is_empty();
        let mut tools = Vec::with_capacity(2);
        if offer_schema {
            tools.push(request.schema.clone());
        }
        if !request.existing.is_empty() {
            tools.push(patch_tool_spec());
        }

        let system = Self::system_prompt(&request, offer_schema);
        let conversation = text_only(request.messages);
        let completion = agent::complete(
            self.provider.as_ref(),
            &CompletionRequest {
                system_prompt: Some(&system),
                messages: &conversation,
                tools: &tools,
                tool_choice: ToolChoice::Required,
                parallel_tool_calls: request.enable_inserts,
            },
        )
        .await?;

        if completion.tool_calls.is_empty() {
            return Err(ExtractError::NoToolCall.into());
        }

        // Patches compose when the model edits the same document twice.
        let mut working: HashMap<&DocumentId, Value> = request
            .existing
            .iter()
            .map(|(id, value)| (id, value.clone()))
            .collect();
        let mut docs = Vec::with_capacity(completion.tool_calls.len());

        for call in completion.tool_calls {
            if offer_schema && call.name == request.schema.name {
                if !call.input.as_object().is_some_and(|fields| !fields.is_empty()) {
                    return Err(ExtractError::MalformedArguments {
                        tool: call.name,
                        reason: format!("expected a non-empty JSON object, got {}", call.input),
                    }
                    .into());
                }
                docs.push(ExtractedDoc {
                    id: None,
                    value: call.input,
                    change: Change::New,
                });
            } else if call.name == PATCH_TOOL && !request.existing.is_empty() {
                let args: PatchDocArgs =
                    serde_json::from_value(call.input).map_err(|e| ExtractError::MalformedArguments {
                        tool: PATCH_TOOL.into(),
                        reason: e.to_string(),
                    })?;
                let (id, current) = working
                    .iter_mut()
                    .find(|(id, _)| id.as_str() == args.json_doc_id)
                    .ok_or_else(|| ExtractError::UnknownDocument(args.json_doc_id.clone()))?;

                patch::apply(current, &args.patches).map_err(|reason| ExtractError::InvalidPatch {
                    id: args.json_doc_id.clone(),
                    reason,
                })?;
                debug!(doc_id = %id, ops = args.patches.len(), "applied patch");

                docs.push(ExtractedDoc {
                    id: Some((*id).clone()),
                    value: current.clone(),
                    change: Change::Patched {
                        planned_edits: args.planned_edits,
                        patches: args.patches,
                    },
                });
            } else {
                return Err(ExtractError::UnexpectedTool(call.name).into());
            }
        }

        info!(
            schema = %request.schema.name,
            new = docs.iter().filter(|d| d.change == Change::New).count(),
            patched = docs.iter().filter(|d| d.change != Change::New).count(),
            "extraction complete"
        );
        Ok(docs)
    }
}

/// Schema of the patch tool offered alongside existing documents.
pub fn patch_tool_spec() -> ToolSpec {
    ToolSpec::for_args::<PatchDocArgs>(
        PATCH_TOOL,
        "Patch an existing JSON document. Plan the edits first, then emit \
         JSON patch (RFC 6902) operations that apply them.",
    )
}

/// Keep only non-empty human/assistant text turns; tool bookkeeping from
/// earlier graph rounds is not part of what the user said.
pub fn text_only(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| matches!(m.content, MessageContent::Text { .. }) && !m.is_blank())
        .cloned()
        .collect()
}

/// Human-readable account of what an extraction changed.
pub fn summarize_changes(schema_name: &str, docs: &[(DocumentId, ExtractedDoc)]) -> String {
    docs.iter()
        .map(|(id, doc)| match &doc.change {
            Change::Patched {
                planned_edits,
                patches,
            } => {
                let added = patches
                    .first()
                    .and_then(|p| p.value.as_ref())
                    .map(render_value)
                    .unwrap_or_else(|| "(removed)".into());
                format!("Document {id} updated:\nPlan: {planned_edits}\nAdded content: {added}")
            }
            Change::New => format!(
                "New {schema_name} created:\nContent: {}",
                render_value(&doc.value)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
