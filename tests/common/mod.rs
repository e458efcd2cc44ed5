#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use taskmaster::agent::providers::LlmProvider;
use taskmaster::agent::{AgentEvent, CompletionRequest};
use taskmaster::config::GraphConfig;
use taskmaster::graph::{MemoryGraph, RunConfig};
use taskmaster::types::{Message, ToolChoice};
use tokio::sync::mpsc;

/// One scripted model reply: some text and/or tool calls.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub tool_calls: Vec<(String, Value)>,
}

/// What a provider call was asked to do.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
}

/// Provider that plays back queued replies in order and records every
/// request. An exhausted script reports a provider error.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    recorded: Mutex<Vec<Recorded>>,
    call_ids: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn call_streaming(
        &self,
        request: &CompletionRequest<'_>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        self.recorded.lock().unwrap().push(Recorded {
            system_prompt: request.system_prompt.map(str::to_string),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            tool_choice: request.tool_choice.clone(),
            parallel_tool_calls: request.parallel_tool_calls,
        });

        let next = self.replies.lock().unwrap().pop_front();
        let Some(reply) = next else {
            let _ = tx.send(AgentEvent::Error("script exhausted".into())).await;
            let _ = tx.send(AgentEvent::Done).await;
            return Ok(());
        };

        if !reply.text.is_empty() {
            let _ = tx.send(AgentEvent::Text(reply.text)).await;
        }
        for (name, input) in reply.tool_calls {
            let n = self.call_ids.fetch_add(1, Ordering::SeqCst);
            let _ = tx
                .send(AgentEvent::ToolUse {
                    id: format!("call_{n}"),
                    name,
                    input,
                })
                .await;
        }
        let _ = tx.send(AgentEvent::Done).await;
        Ok(())
    }
}

pub fn text(reply: &str) -> Reply {
    Reply {
        text: reply.into(),
        tool_calls: Vec::new(),
    }
}

pub fn tool(name: &str, input: Value) -> Reply {
    Reply {
        text: String::new(),
        tool_calls: vec![(name.into(), input)],
    }
}

pub fn tools(calls: Vec<(&str, Value)>) -> Reply {
    Reply {
        text: String::new(),
        tool_calls: calls.into_iter().map(|(n, v)| (n.into(), v)).collect(),
    }
}

/// The reasoning node asking for an update of `kind`.
pub fn update(kind: &str) -> Reply {
    tool("UpdateMemory", json!({ "update_type": kind }))
}

pub fn graph(provider: Arc<ScriptedProvider>) -> MemoryGraph {
    MemoryGraph::in_memory(provider, GraphConfig::default())
}

pub fn run_config(user_id: &str, thread_id: &str) -> RunConfig {
    RunConfig {
        user_id: user_id.into(),
        thread_id: thread_id.into(),
    }
}
