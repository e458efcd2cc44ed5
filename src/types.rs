use schemars::JsonSchema;
use schemars::generate::SchemaSettings;
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
    Tool,
}

/// A message in a conversation thread. Stored by the checkpointer and sent
/// to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Content of a message: text, a tool use request, or a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl Message {
    fn now(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::now(Role::Human, MessageContent::Text { text: text.into() })
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::now(Role::Assistant, MessageContent::Text { text: text.into() })
    }

    /// An assistant turn carrying a pending tool call.
    pub fn tool_use(call: ToolCall) -> Self {
        Self::now(
            Role::Assistant,
            MessageContent::ToolUse {
                id: call.id,
                name: call.name,
                input: call.input,
            },
        )
    }

    /// A tool result answering the call with id `tool_use_id`.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::now(
            Role::Tool,
            MessageContent::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            },
        )
    }

    /// Visible text of the message. Empty for tool calls.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text { text } => text,
            MessageContent::ToolUse { .. } => "",
            MessageContent::ToolResult { content, .. } => content,
        }
    }

    /// A text turn with nothing but whitespace. Providers reject these.
    pub fn is_blank(&self) -> bool {
        matches!(&self.content, MessageContent::Text { text } if text.trim().is_empty())
    }

    /// The pending tool call, if this message carries one.
    pub fn tool_call(&self) -> Option<ToolCall> {
        match &self.content {
            MessageContent::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        }
    }

    /// Convert to the Anthropic Messages API format.
    pub fn as_anthropic_message(&self) -> serde_json::Value {
        match &self.content {
            MessageContent::Text { text } => serde_json::json!({
                "role": match self.role {
                    Role::Assistant => "assistant",
                    Role::Human | Role::Tool => "user",
                },
                "content": text,
            }),
            MessageContent::ToolUse { id, name, input } => serde_json::json!({
                "role": "assistant",
                "content": [{
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                }],
            }),
            MessageContent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                }],
            }),
        }
    }

    /// Convert to the OpenAI Chat Completions format.
    pub fn as_openai_message(&self) -> serde_json::Value {
        match &self.content {
            MessageContent::Text { text } => serde_json::json!({
                "role": match self.role {
                    Role::Assistant => "assistant",
                    Role::Human | Role::Tool => "user",
                },
                "content": text,
            }),
            MessageContent::ToolUse { id, name, input } => serde_json::json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    },
                }],
            }),
            MessageContent::ToolResult {
                tool_use_id,
                content,
                ..
            } => serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            }),
        }
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    /// Tool whose input schema is derived from the argument type `T`.
    pub fn for_args<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: input_schema::<T>(),
        }
    }
}

/// Self-contained object schema for `T`: subschemas inlined, no `$schema`
/// or `title` keys, which providers either reject or ignore.
pub fn input_schema<T: JsonSchema>() -> serde_json::Value {
    let schema = SchemaSettings::draft2020_12()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<T>();
    let mut value = schema.to_value();
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    value
}

/// How the model is allowed to use the offered tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides between text and a tool call.
    Auto,
    /// Model must call at least one tool.
    Required,
    /// Model must call the named tool.
    Tool(String),
    /// Tools stay declared but the model must answer in text.
    None,
}
