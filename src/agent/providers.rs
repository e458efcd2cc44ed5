use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AgentEvent, CompletionRequest};
use crate::types::{ToolChoice, ToolSpec};

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Trait for LLM provider implementations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn call_streaming(
        &self,
        request: &CompletionRequest<'_>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()>;
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
            endpoint: ANTHROPIC_ENDPOINT.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Request body for the Messages API.
    pub fn build_body(&self, request: &CompletionRequest<'_>) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| !m.is_blank())
            .map(|m| m.as_anthropic_message())
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
            "stream": true,
        });

        if let Some(system) = request.system_prompt {
            body["system"] = serde_json::json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(build_anthropic_tools(request.tools));
            let mut choice = match &request.tool_choice {
                ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
                ToolChoice::Required => serde_json::json!({ "type": "any" }),
                ToolChoice::Tool(name) => serde_json::json!({ "type": "tool", "name": name }),
                ToolChoice::None => serde_json::json!({ "type": "none" }),
            };
            if request.tool_choice != ToolChoice::None {
                choice["disable_parallel_tool_use"] =
                    serde_json::json!(!request.parallel_tool_calls);
            }
            body["tool_choice"] = choice;
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn call_streaming(
        &self,
        request: &CompletionRequest<'_>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let body = self.build_body(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let _ = tx
                .send(AgentEvent::Error(format!("{status}: {text}")))
                .await;
            let _ = tx.send(AgentEvent::Done).await;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut current_tool_id = String::new();
        let mut current_tool_name = String::new();
        let mut current_tool_input = String::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find("\n\n") {
                let event_text = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();

                // Parse SSE event type and data
                let mut event_type = String::new();
                let mut data = String::new();
                for line in event_text.lines() {
                    if let Some(et) = line.strip_prefix("event: ") {
                        event_type = et.to_string();
                    } else if let Some(d) = line.strip_prefix("data: ") {
                        data = d.to_string();
                    }
                }

                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                let parsed: serde_json::Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("skipping unparseable SSE data: {e}");
                        continue;
                    }
                };

                match event_type.as_str() {
                    "message_start" => {
                        if let Some(it) = parsed
                            .pointer("/message/usage/input_tokens")
                            .and_then(|v| v.as_u64())
                        {
                            input_tokens = it as u32;
                        }
                    }

                    "content_block_start" => {
                        if let Some(cb) = parsed.get("content_block") {
                            if cb.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                                current_tool_id = cb
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_string();
                                current_tool_name = cb
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_string();
                                current_tool_input.clear();
                            }
                        }
                    }

                    "content_block_delta" => {
                        if let Some(delta) = parsed.get("delta") {
                            match delta.get("type").and_then(|t| t.as_str()) {
                                Some("text_delta") => {
                                    if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                                        let _ = tx.send(AgentEvent::Text(text.into())).await;
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let Some(json) =
                                        delta.get("partial_json").and_then(|t| t.as_str())
                                    {
                                        current_tool_input.push_str(json);
                                    }
                                }
                                _ => {}
                            }
                        }
                    }

                    "content_block_stop" => {
                        if !current_tool_id.is_empty() {
                            let name = std::mem::take(&mut current_tool_name);
                            let event = match parse_tool_arguments(&name, &current_tool_input) {
                                Ok(input) => AgentEvent::ToolUse {
                                    id: std::mem::take(&mut current_tool_id),
                                    name,
                                    input,
                                },
                                Err(e) => {
                                    current_tool_id.clear();
                                    AgentEvent::Error(e)
                                }
                            };
                            let _ = tx.send(event).await;
                            current_tool_input.clear();
                        }
                    }

                    "message_delta" => {
                        if let Some(ot) = parsed
                            .pointer("/usage/output_tokens")
                            .and_then(|v| v.as_u64())
                        {
                            output_tokens = ot as u32;
                        }
                    }

                    "message_stop" => {
                        let _ = tx
                            .send(AgentEvent::Usage {
                                input_tokens,
                                output_tokens,
                            })
                            .await;
                        let _ = tx.send(AgentEvent::Done).await;
                        return Ok(());
                    }

                    "error" => {
                        let message = parsed
                            .pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("stream error");
                        let _ = tx.send(AgentEvent::Error(message.to_string())).await;
                        let _ = tx.send(AgentEvent::Done).await;
                        return Ok(());
                    }

                    _ => {}
                }
            }
        }

        let _ = tx
            .send(AgentEvent::Usage {
                input_tokens,
                output_tokens,
            })
            .await;
        let _ = tx.send(AgentEvent::Done).await;
        Ok(())
    }
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
            endpoint: OPENAI_ENDPOINT.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Request body for the Chat Completions API.
    pub fn build_body(&self, request: &CompletionRequest<'_>) -> serde_json::Value {
        // Prepend system message if provided
        let mut all_messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system_prompt {
            all_messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }
        all_messages.extend(request.messages.iter().map(|m| m.as_openai_message()));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": all_messages,
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(build_openai_tools(request.tools));
            body["tool_choice"] = match &request.tool_choice {
                ToolChoice::Auto => serde_json::json!("auto"),
                ToolChoice::Required => serde_json::json!("required"),
                ToolChoice::Tool(name) => serde_json::json!({
                    "type": "function",
                    "function": { "name": name },
                }),
                ToolChoice::None => serde_json::json!("none"),
            };
            if request.tool_choice != ToolChoice::None {
                body["parallel_tool_calls"] = serde_json::json!(request.parallel_tool_calls);
            }
        }

        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn call_streaming(
        &self,
        request: &CompletionRequest<'_>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let body = self.build_body(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let _ = tx
                .send(AgentEvent::Error(format!("{status}: {text}")))
                .await;
            let _ = tx.send(AgentEvent::Done).await;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut tool_calls: std::collections::BTreeMap<usize, (String, String, String)> =
            std::collections::BTreeMap::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();

                let Some(data) = event.strip_prefix("data: ") else {
                    continue;
                };

                if data == "[DONE]" {
                    flush_tool_calls(&mut tool_calls, &tx).await;
                    let _ = tx
                        .send(AgentEvent::Usage {
                            input_tokens,
                            output_tokens,
                        })
                        .await;
                    let _ = tx.send(AgentEvent::Done).await;
                    return Ok(());
                }

                let parsed: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("skipping unparseable SSE data: {e}");
                        continue;
                    }
                };

                // Usage arrives in the final chunk
                if let Some(usage) = parsed.get("usage") {
                    if let Some(it) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
                        input_tokens = it as u32;
                    }
                    if let Some(ot) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
                        output_tokens = ot as u32;
                    }
                }

                let Some(choice) = parsed
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .and_then(|c| c.first())
                else {
                    continue;
                };

                let delta = choice.get("delta");

                if let Some(text) = delta
                    .and_then(|d| d.get("content"))
                    .and_then(|c| c.as_str())
                {
                    let _ = tx.send(AgentEvent::Text(text.into())).await;
                }

                if let Some(tcs) = delta
                    .and_then(|d| d.get("tool_calls"))
                    .and_then(|t| t.as_array())
                {
                    for tc in tcs {
                        let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                        let entry = tool_calls
                            .entry(index)
                            .or_insert_with(|| (String::new(), String::new(), String::new()));

                        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                            entry.0 = id.to_string();
                        }
                        if let Some(func) = tc.get("function") {
                            if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                                entry.1 = name.to_string();
                            }
                            if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                                entry.2.push_str(args);
                            }
                        }
                    }
                }

                if choice.get("finish_reason").and_then(|f| f.as_str()) == Some("tool_calls") {
                    flush_tool_calls(&mut tool_calls, &tx).await;
                }
            }
        }

        flush_tool_calls(&mut tool_calls, &tx).await;
        let _ = tx
            .send(AgentEvent::Usage {
                input_tokens,
                output_tokens,
            })
            .await;
        let _ = tx.send(AgentEvent::Done).await;
        Ok(())
    }
}

/// Emit accumulated tool calls in index order.
async fn flush_tool_calls(
    tool_calls: &mut std::collections::BTreeMap<usize, (String, String, String)>,
    tx: &mpsc::Sender<AgentEvent>,
) {
    for (_, (id, name, args)) in std::mem::take(tool_calls) {
        let event = match parse_tool_arguments(&name, &args) {
            Ok(input) => AgentEvent::ToolUse { id, name, input },
            Err(e) => AgentEvent::Error(e),
        };
        let _ = tx.send(event).await;
    }
}

/// Parse streamed tool arguments. No arguments at all is an empty object;
/// anything else must be a JSON object.
fn parse_tool_arguments(tool: &str, raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(other) => Err(format!(
            "malformed arguments for tool '{tool}': expected a JSON object, got {other}"
        )),
        Err(e) => {
            warn!(tool, "unparseable tool arguments: {e}");
            Err(format!("malformed arguments for tool '{tool}': {e}"))
        }
    }
}

/// Create a provider from config.
pub fn from_config(config: &crate::config::AgentDefConfig) -> anyhow::Result<Box<dyn LlmProvider>> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "no API key for provider '{}'. Set {} env var.",
            config.provider,
            match config.provider.as_str() {
                "anthropic" => "ANTHROPIC_API_KEY",
                "openai" => "OPENAI_API_KEY",
                _ => "the appropriate API key",
            }
        )
    })?;

    match config.provider.as_str() {
        "anthropic" => {
            let mut provider =
                AnthropicProvider::new(api_key, config.model.clone(), config.max_tokens);
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Ok(Box::new(provider))
        }
        "openai" => {
            let mut provider = OpenAiProvider::new(api_key, config.model.clone(), config.max_tokens);
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Build tool schemas for the Anthropic API.
///
/// Anthropic format:
/// ```json
/// { "name": "UpdateMemory", "description": "...", "input_schema": { "type": "object", ... } }
/// ```
pub fn build_anthropic_tools(specs: &[ToolSpec]) -> Vec<serde_json::Value> {
    specs
        .iter()
        .map(|spec| {
            serde_json::json!({
                "name": spec.name,
                "description": spec.description,
                "input_schema": spec.input_schema,
            })
        })
        .collect()
}

/// Build tool schemas for the OpenAI API.
///
/// OpenAI format:
/// ```json
/// { "type": "function", "function": { "name": "UpdateMemory", "description": "...", "parameters": { ... } } }
/// ```
pub fn build_openai_tools(specs: &[ToolSpec]) -> Vec<serde_json::Value> {
    specs
        .iter()
        .map(|spec| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.input_schema,
                }
            })
        })
        .collect()
}
