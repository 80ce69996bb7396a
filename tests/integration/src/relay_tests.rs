//! Streaming relay tests across the manager, adapters and log writer

use crate::helpers::*;
use gateway_chat::{ChatStreamHandle, StreamEvent};
use gateway_core::{CallerId, ProviderConfig, ProviderUpdate, RequestStatus, CLIENT_DISCONNECTED};
use gateway_providers::default_factories;
use gateway_providers::testing::{ScriptStep, ScriptedFactory};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chunk(content: &str) -> String {
    format!(
        r#"{{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{{"index":0,"delta":{{"content":"{content}"}}}}]}}"#
    )
}

fn sse_body(events: &[String]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

async fn mock_upstream(body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    server
}

/// Drain the handle, returning chunk contents and the terminal event
async fn drain(handle: &mut ChatStreamHandle) -> (Vec<String>, Option<StreamEvent>) {
    let mut contents = Vec::new();
    while let Some(event) = handle.events.recv().await {
        match event {
            StreamEvent::Chunk(chunk) => contents.push(chunk.content()),
            terminal => return (contents, Some(terminal)),
        }
    }
    (contents, None)
}

#[tokio::test]
async fn test_stream_from_http_upstream_in_order() {
    let upstream = mock_upstream(sse_body(&[
        chunk("A"),
        chunk("B"),
        chunk("C"),
        "[DONE]".to_string(),
    ]))
    .await;

    let gateway = TestGateway::new(default_factories());
    gateway
        .manager
        .create_provider(ProviderConfig::new("local", "vllm", upstream.uri()))
        .await
        .expect("create");

    let mut handle = gateway
        .relay()
        .chat_stream(
            CallerId::new("tester"),
            "local",
            chat_request("hi"),
            CancellationToken::new(),
        )
        .expect("stream");

    let (contents, terminal) = drain(&mut handle).await;
    assert_eq!(contents, vec!["A", "B", "C"]);
    assert!(matches!(terminal, Some(StreamEvent::Done)));

    let summary = handle.summary.await.expect("summary");
    assert_eq!(summary.status, RequestStatus::Success);

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RequestStatus::Success);
    assert_eq!(logs[0].response_content, "ABC");
    assert_eq!(logs[0].caller.as_str(), "tester");
    assert_eq!(logs[0].model_name, "local");
}

#[tokio::test]
async fn test_stream_upstream_error_after_first_chunk() {
    let upstream = mock_upstream(sse_body(&[
        chunk("A"),
        r#"{"error":{"message":"overloaded","type":"server_error"}}"#.to_string(),
        chunk("B"),
    ]))
    .await;

    let gateway = TestGateway::new(default_factories());
    gateway
        .manager
        .create_provider(ProviderConfig::new("local", "openai", upstream.uri()))
        .await
        .expect("create");

    let mut handle = gateway
        .relay()
        .chat_stream(
            CallerId::anonymous(),
            "local",
            chat_request("hi"),
            CancellationToken::new(),
        )
        .expect("stream");

    let (contents, terminal) = drain(&mut handle).await;
    assert_eq!(contents, vec!["A"]);
    match terminal {
        Some(StreamEvent::Error(err)) => assert!(err.to_string().contains("overloaded")),
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(handle.events.recv().await.is_none());

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RequestStatus::Error);
    assert_eq!(logs[0].response_content, "A");
}

#[tokio::test]
async fn test_stream_cancel_after_first_chunk() {
    let factories = default_factories().with_factory(
        "scripted",
        Arc::new(
            ScriptedFactory::new("scripted")
                .with_steps(vec![ScriptStep::text("A"), ScriptStep::Hang, ScriptStep::text("B")]),
        ),
    );
    let gateway = TestGateway::new(factories);
    gateway
        .manager
        .create_provider(ProviderConfig::new("p1", "scripted", "http://p1"))
        .await
        .expect("create");

    let cancel = CancellationToken::new();
    let mut handle = gateway
        .relay()
        .chat_stream(CallerId::anonymous(), "p1", chat_request("hi"), cancel.clone())
        .expect("stream");

    match handle.events.recv().await {
        Some(StreamEvent::Chunk(chunk)) => assert_eq!(chunk.content(), "A"),
        other => panic!("expected chunk, got {other:?}"),
    }
    cancel.cancel();

    let summary = handle.summary.await.expect("summary");
    assert_eq!(summary.status, RequestStatus::Interrupted);
    assert_eq!(summary.content, "A");
    assert!(handle.events.recv().await.is_none());

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RequestStatus::Interrupted);
    assert_eq!(logs[0].response_content, "A");
    assert_eq!(logs[0].error_message.as_deref(), Some(CLIENT_DISCONNECTED));
}

#[tokio::test]
async fn test_reload_does_not_disturb_open_stream() {
    let gate = Arc::new(Notify::new());
    let factories = default_factories().with_factory(
        "scripted",
        Arc::new(ScriptedFactory::new("scripted").with_steps(vec![
            ScriptStep::text("old-1"),
            ScriptStep::Wait(Arc::clone(&gate)),
            ScriptStep::text("old-2"),
        ])),
    );
    let gateway = TestGateway::new(factories);
    gateway
        .manager
        .create_provider(ProviderConfig::new("p1", "scripted", "http://old"))
        .await
        .expect("create");

    let mut handle = gateway
        .relay()
        .chat_stream(
            CallerId::anonymous(),
            "p1",
            chat_request("hi"),
            CancellationToken::new(),
        )
        .expect("stream");
    assert!(matches!(handle.events.recv().await, Some(StreamEvent::Chunk(_))));

    // Swap p1 onto a real upstream while the scripted stream is paused.
    let upstream = mock_upstream(sse_body(&[chunk("new"), "[DONE]".to_string()])).await;
    gateway
        .manager
        .update_provider(
            "p1",
            ProviderUpdate {
                adapter_type: Some("vllm".into()),
                base_url: Some(upstream.uri()),
                ..Default::default()
            },
        )
        .await
        .expect("update");
    gate.notify_one();

    let (contents, terminal) = drain(&mut handle).await;
    assert_eq!(contents, vec!["old-2"]);
    assert!(matches!(terminal, Some(StreamEvent::Done)));
    assert_eq!(handle.summary.await.expect("summary").content, "old-1old-2");

    let mut fresh = gateway
        .relay()
        .chat_stream(
            CallerId::anonymous(),
            "p1",
            chat_request("hi"),
            CancellationToken::new(),
        )
        .expect("fresh stream");
    let (contents, _) = drain(&mut fresh).await;
    assert_eq!(contents, vec!["new"]);

    let logs = gateway.logs_after(2).await;
    let contents: Vec<_> = logs.iter().map(|l| l.response_content.as_str()).collect();
    assert_eq!(contents, vec!["old-1old-2", "new"]);
}
