mod common;

use common::{ScriptedProvider, text, tool, tools};
use serde_json::{Value, json};
use taskmaster::extract::{
    Change, ExtractError, ExtractRequest, ExtractedDoc, Extractor, LlmExtractor, PatchKind,
    PatchOp, summarize_changes, text_only,
};
use taskmaster::memory::DocumentId;
use taskmaster::memory::schema::Todo;
use taskmaster::types::{Message, ToolCall};

fn existing_todo() -> Vec<(DocumentId, Value)> {
    vec![(
        DocumentId::new("todo-1"),
        json!({ "task": "buy milk", "solutions": ["corner shop"] }),
    )]
}

async fn run(
    provider: std::sync::Arc<ScriptedProvider>,
    messages: &[Message],
    existing: &[(DocumentId, Value)],
    enable_inserts: bool,
) -> anyhow::Result<Vec<ExtractedDoc>> {
    let extractor = LlmExtractor::new(provider);
    extractor
        .extract(ExtractRequest {
            instruction: "Reflect on the following interaction.",
            messages,
            schema: &Todo::tool_spec(),
            existing,
            enable_inserts,
        })
        .await
}

#[tokio::test]
async fn new_documents_have_no_id() {
    let provider = ScriptedProvider::new([tools(vec![
        ("ToDo", json!({ "task": "a", "solutions": ["x"] })),
        ("ToDo", json!({ "task": "b", "solutions": ["y"] })),
    ])]);

    let docs = run(provider, &[Message::human("a and b")], &[], true)
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.id.is_none() && d.change == Change::New));
    assert_eq!(docs[1].value["task"], "b");
}

#[tokio::test]
async fn patches_compose_on_the_same_document() {
    let provider = ScriptedProvider::new([tools(vec![
        (
            "PatchDoc",
            json!({
                "json_doc_id": "todo-1",
                "planned_edits": "add a solution",
                "patches": [{ "op": "add", "path": "/solutions/-", "value": "delivery app" }]
            }),
        ),
        (
            "PatchDoc",
            json!({
                "json_doc_id": "todo-1",
                "planned_edits": "start it",
                "patches": [{ "op": "replace", "path": "/status", "value": "in progress" }]
            }),
        ),
    ])]);

    let docs = run(provider, &[Message::human("on it")], &existing_todo(), true)
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    let last = &docs[1];
    assert_eq!(last.id, Some(DocumentId::new("todo-1")));
    assert_eq!(
        last.value,
        json!({
            "task": "buy milk",
            "solutions": ["corner shop", "delivery app"],
            "status": "in progress"
        })
    );
}

#[tokio::test]
async fn schema_tool_withheld_when_inserts_disabled_and_documents_exist() {
    let provider = ScriptedProvider::new([tool(
        "PatchDoc",
        json!({ "json_doc_id": "todo-1", "planned_edits": "", "patches": [] }),
    )]);

    run(provider.clone(), &[Message::human("hm")], &existing_todo(), false)
        .await
        .unwrap();

    let call = &provider.recorded()[0];
    assert_eq!(call.tools, vec!["PatchDoc"]);
    assert!(!call.parallel_tool_calls);
}

#[tokio::test]
async fn tool_turns_are_filtered_from_the_conversation() {
    let provider = ScriptedProvider::new([tool("ToDo", json!({ "task": "a", "solutions": ["x"] }))]);
    let messages = vec![
        Message::human("first"),
        Message::tool_use(ToolCall {
            id: "c1".into(),
            name: "UpdateMemory".into(),
            input: json!({ "update_type": "todo" }),
        }),
        Message::tool_result("c1", "New ToDo created"),
        Message::assistant("done"),
        Message::human("second"),
    ];

    run(provider.clone(), &messages, &[], true).await.unwrap();

    let seen: Vec<String> = provider.recorded()[0]
        .messages
        .iter()
        .map(|m| m.text().to_string())
        .collect();
    assert_eq!(seen, vec!["first", "done", "second"]);
}

#[tokio::test]
async fn unknown_document_id_is_an_error() {
    let provider = ScriptedProvider::new([tool(
        "PatchDoc",
        json!({ "json_doc_id": "todo-9", "planned_edits": "x", "patches": [] }),
    )]);

    let err = run(provider, &[Message::human("x")], &existing_todo(), true)
        .await
        .expect_err("unknown id");
    assert!(matches!(
        err.downcast_ref::<ExtractError>(),
        Some(ExtractError::UnknownDocument(id)) if id == "todo-9"
    ));
}

#[tokio::test]
async fn invalid_patch_is_an_error() {
    let provider = ScriptedProvider::new([tool(
        "PatchDoc",
        json!({
            "json_doc_id": "todo-1",
            "planned_edits": "drop a solution",
            "patches": [{ "op": "remove", "path": "/solutions/5" }]
        }),
    )]);

    let err = run(provider, &[Message::human("x")], &existing_todo(), true)
        .await
        .expect_err("out of bounds remove");
    assert!(err.to_string().contains("invalid patch for document 'todo-1'"));
}

#[tokio::test]
async fn unoffered_tool_is_an_error() {
    let provider = ScriptedProvider::new([tool("PatchDoc", json!({}))]);

    let err = run(provider, &[Message::human("x")], &[], true)
        .await
        .expect_err("patch without documents");
    assert!(matches!(
        err.downcast_ref::<ExtractError>(),
        Some(ExtractError::UnexpectedTool(name)) if name == "PatchDoc"
    ));
}

#[tokio::test]
async fn text_reply_is_an_error() {
    let provider = ScriptedProvider::new([text("nothing to save")]);
    let err = run(provider, &[Message::human("x")], &[], true)
        .await
        .expect_err("no tool call");
    assert!(matches!(
        err.downcast_ref::<ExtractError>(),
        Some(ExtractError::NoToolCall)
    ));
}

#[test]
fn summary_distinguishes_new_and_patched() {
    let docs = vec![
        (
            DocumentId::new("todo-1"),
            ExtractedDoc {
                id: Some(DocumentId::new("todo-1")),
                value: json!({ "task": "buy milk" }),
                change: Change::Patched {
                    planned_edits: "add a solution".into(),
                    patches: vec![PatchOp {
                        op: PatchKind::Add,
                        path: "/solutions/-".into(),
                        value: Some(json!("delivery app")),
                    }],
                },
            },
        ),
        (
            DocumentId::new("todo-2"),
            ExtractedDoc {
                id: None,
                value: json!({ "task": "call mom" }),
                change: Change::New,
            },
        ),
    ];

    let summary = summarize_changes("ToDo", &docs);
    assert_eq!(
        summary,
        "Document todo-1 updated:\nPlan: add a solution\nAdded content: delivery app\n\n\
         New ToDo created:\nContent: {\"task\":\"call mom\"}"
    );
}

#[test]
fn text_only_drops_tool_turns_and_blank_text() {
    let call = ToolCall {
        id: "call_1".into(),
        name: "UpdateMemory".into(),
        input: json!({ "update_type": "todo" }),
    };
    let messages = vec![
        Message::human("buy milk"),
        Message::tool_use(call),
        Message::tool_result("call_1", "updated"),
        Message::assistant(""),
        Message::assistant(" \t"),
        Message::assistant("Added it."),
    ];

    let kept = text_only(&messages);
    let texts: Vec<&str> = kept.iter().map(Message::text).collect();
    assert_eq!(texts, vec!["buy milk", "Added it."]);
}

#[tokio::test]
async fn empty_schema_arguments_are_malformed() {
    let provider = ScriptedProvider::new([tool("ToDo", json!({}))]);

    let err = run(provider, &[Message::human("buy milk")], &[], true)
        .await
        .expect_err("empty document must fail");
    assert!(matches!(
        err.downcast_ref::<ExtractError>(),
        Some(ExtractError::MalformedArguments { tool, .. }) if tool == "ToDo"
    ));
}
