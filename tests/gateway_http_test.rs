mod common;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::post};
use common::{ScriptedProvider, text};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taskmaster::config::TaskmasterConfig;
use taskmaster::gateway::{AppState, app};
use taskmaster::memory::{MemoryCategory, Namespace};
use tokio::time::{Duration, sleep};

#[derive(Clone, Default)]
struct MockOpenAi {
    replies: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

fn sse(chunks: &[Value]) -> String {
    let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_stream(content: &str) -> String {
    sse(&[
        json!({ "choices": [{ "delta": { "content": content }, "finish_reason": null }] }),
        json!({
            "choices": [{ "delta": {}, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 1 }
        }),
    ])
}

fn tool_stream(name: &str, arguments: Value) -> String {
    tool_stream_raw(name, &arguments.to_string())
}

fn tool_stream_raw(name: &str, arguments: &str) -> String {
    let (head, tail) = arguments.split_at(arguments.len() / 2);
    sse(&[
        json!({ "choices": [{ "delta": { "tool_calls": [{
            "index": 0, "id": "call_1", "type": "function",
            "function": { "name": name, "arguments": head }
        }] }, "finish_reason": null }] }),
        json!({ "choices": [{ "delta": { "tool_calls": [{
            "index": 0, "function": { "arguments": tail }
        }] }, "finish_reason": null }] }),
        json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }] }),
    ])
}

async fn mock_openai_handler(State(mock): State<MockOpenAi>, Json(body): Json<Value>) -> Response {
    mock.requests.lock().unwrap().push(body);
    match mock.replies.lock().unwrap().pop_front() {
        Some(stream) => ([(header::CONTENT_TYPE, "text/event-stream")], stream).into_response(),
        None => (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response(),
    }
}

async fn start_mock_openai_server(replies: Vec<String>) -> (String, MockOpenAi) {
    let mock = MockOpenAi::default();
    mock.replies.lock().unwrap().extend(replies);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/v1/chat/completions", post(mock_openai_handler))
        .with_state(mock.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1/chat/completions"), mock)
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

fn gateway_config(port: u16, endpoint: &str) -> TaskmasterConfig {
    let mut config = TaskmasterConfig::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = port;
    config.agent.provider = "openai".to_string();
    config.agent.model = "gpt-4o".to_string();
    config.agent.api_key = Some("test-key".to_string());
    config.agent.endpoint = Some(endpoint.to_string());
    config
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    for _ in 0..80 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }

    panic!("gateway did not become healthy at {url}");
}

async fn start_gateway(config: TaskmasterConfig) -> tokio::task::JoinHandle<()> {
    let port = config.gateway.port;
    let gateway = tokio::spawn(async move {
        let _ = taskmaster::gateway::run(config).await;
    });
    wait_for_health(port).await;
    gateway
}

async fn post_chat(port: u16, body: String) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/chat"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("chat response");
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    let body = response.json::<Value>().await.expect("json body");
    (status, body)
}

fn chat_body(user_id: &str, thread_id: &str, message: &str) -> String {
    json!({
        "config": { "configurable": { "user_id": user_id, "thread_id": thread_id } },
        "message": message
    })
    .to_string()
}

#[tokio::test]
async fn run_fails_without_api_key() {
    let mut config = TaskmasterConfig::default();
    config.gateway.port = free_port();
    config.agent.api_key = None;

    let err = taskmaster::gateway::run(config)
        .await
        .expect_err("missing key must fail");
    assert!(err.to_string().contains("no API key"));
}

#[tokio::test]
async fn todo_request_updates_memory_and_reports_it() {
    let (endpoint, mock) = start_mock_openai_server(vec![
        tool_stream("UpdateMemory", json!({ "update_type": "todo" })),
        tool_stream(
            "ToDo",
            json!({
                "task": "buy milk",
                "deadline": "2026-10-20",
                "solutions": ["corner shop"]
            }),
        ),
        text_stream("Added milk to your list."),
    ])
    .await;

    let port = free_port();
    let gateway = start_gateway(gateway_config(port, &endpoint)).await;

    let (status, body) = post_chat(
        port,
        chat_body("u1", "t1", "Remind me to buy milk tomorrow"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let response = body["response"].as_str().expect("response text");
    assert!(response.contains("New ToDo created"), "{response}");
    assert!(response.contains("buy milk"), "{response}");
    assert!(response.ends_with("Added milk to your list."), "{response}");

    let requests = mock.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0]["model"], "gpt-4o");
    assert_eq!(requests[0]["tools"][0]["function"]["name"], "UpdateMemory");
    assert_eq!(requests[0]["parallel_tool_calls"], false);
    assert_eq!(requests[1]["tool_choice"], "required");
    assert_eq!(requests[2]["tool_choice"], "none");
    // Final reasoning pass carries the tool exchange in OpenAI form.
    let messages = requests[2]["messages"].as_array().expect("messages");
    assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "UpdateMemory");
    assert_eq!(messages[3]["role"], "tool");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn missing_user_id_is_a_server_error() {
    let port = free_port();
    let gateway = start_gateway(gateway_config(port, "http://127.0.0.1:9/v1")).await;

    let body = json!({ "config": { "configurable": { "thread_id": "t1" } }, "message": "hi" });
    let (status, body) = post_chat(port, body.to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("configurable.user_id"),
        "{body}"
    );

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn malformed_body_is_a_server_error() {
    let port = free_port();
    let gateway = start_gateway(gateway_config(port, "http://127.0.0.1:9/v1")).await;

    let (status, body) = post_chat(port, "{not json".into()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["detail"]
            .as_str()
            .unwrap_or_default()
            .starts_with("invalid chat request"),
        "{body}"
    );

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn provider_failure_is_a_server_error() {
    let (endpoint, _mock) = start_mock_openai_server(Vec::new()).await;
    let port = free_port();
    let gateway = start_gateway(gateway_config(port, &endpoint)).await;

    let (status, body) = post_chat(port, chat_body("u1", "t1", "hello")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.contains("model call failed"), "{detail}");
    assert!(detail.contains("rate limited"), "{detail}");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn app_serves_graph_with_injected_provider() {
    let provider = ScriptedProvider::new([text("Hello Sam."), text("Still Sam.")]);
    let state = Arc::new(AppState::new(common::graph(provider.clone())));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            let _ = axum::serve(listener, app(state)).await;
        }
    });
    wait_for_health(port).await;

    let (status, body) = post_chat(port, chat_body("u1", "t1", "hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Hello Sam.");

    let (_, body) = post_chat(port, chat_body("u1", "t1", "again")).await;
    assert_eq!(body["response"], "Still Sam.");

    let history = state.graph.checkpointer().read("t1").await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(state.thread_locks.read().await.is_empty());
    assert!(
        state
            .graph
            .store()
            .search(&Namespace::new(MemoryCategory::Profile, "u1"))
            .await
            .unwrap()
            .is_empty()
    );

    server.abort();
    let _ = server.await;
}

#[tokio::test]
async fn malformed_tool_arguments_are_a_server_error() {
    let (endpoint, mock) = start_mock_openai_server(vec![
        tool_stream("UpdateMemory", json!({ "update_type": "user" })),
        tool_stream_raw("Profile", r#"{"name": "Sam", "location": "#),
        text_stream("unreachable"),
    ])
    .await;
    let port = free_port();
    let gateway = start_gateway(gateway_config(port, &endpoint)).await;

    let (status, body) = post_chat(port, chat_body("u1", "t1", "I'm Sam")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.contains("malformed arguments for tool 'Profile'"), "{detail}");
    // The failed run stops before the final reasoning pass.
    assert_eq!(mock.requests.lock().unwrap().len(), 2);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn shared_thread_lock_survives_release() {
    let provider = ScriptedProvider::new(Vec::<common::Reply>::new());
    let state = AppState::new(common::graph(provider));

    let first = state.thread_lock("t1").await;
    let waiting = state.thread_lock("t1").await;
    assert!(Arc::ptr_eq(&first, &waiting));

    state.release_thread_lock("t1", first).await;
    assert!(state.thread_locks.read().await.contains_key("t1"));

    state.release_thread_lock("t1", waiting).await;
    assert!(state.thread_locks.read().await.is_empty());
}
