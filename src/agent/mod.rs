pub mod providers;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{Message, ToolCall, ToolChoice, ToolSpec};
use providers::LlmProvider;

/// A streaming chunk from the LLM.
#[derive(Debug)]
pub enum AgentEvent {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Done,
    Error(String),
}

/// One request to a language model.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
}

impl<'a> CompletionRequest<'a> {
    /// A plain request with no tools.
    pub fn text(system_prompt: Option<&'a str>, messages: &'a [Message]) -> Self {
        Self {
            system_prompt,
            messages,
            tools: &[],
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A fully collected model reply.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// Call the provider and collect its event stream into a [`Completion`].
///
/// The stream is drained while the provider is still sending, so a long
/// reply never stalls on the channel bound. An `Error` event fails the call.
pub async fn complete(
    provider: &dyn LlmProvider,
    request: &CompletionRequest<'_>,
) -> anyhow::Result<Completion> {
    let (tx, rx) = mpsc::channel::<AgentEvent>(32);
    let (result, collected) = tokio::join!(provider.call_streaming(request, tx), collect(rx));
    result?;
    let completion = collected?;

    debug!(
        text_len = completion.text.len(),
        tool_calls = completion.tool_calls.len(),
        input_tokens = completion.usage.input_tokens,
        output_tokens = completion.usage.output_tokens,
        "completion collected"
    );
    Ok(completion)
}

async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> anyhow::Result<Completion> {
    let mut completion = Completion::default();
    let mut error = None;

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Text(text) => completion.text.push_str(&text),
            AgentEvent::ToolUse { id, name, input } => {
                completion.tool_calls.push(ToolCall { id, name, input });
            }
            AgentEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                completion.usage = Usage {
                    input_tokens,
                    output_tokens,
                };
            }
            AgentEvent::Error(e) => {
                warn!("provider reported error: {e}");
                error.get_or_insert(e);
            }
            AgentEvent::Done => break,
        }
    }

    match error {
        Some(e) => Err(anyhow::anyhow!("model call failed: {e}")),
        None => Ok(completion),
    }
}
