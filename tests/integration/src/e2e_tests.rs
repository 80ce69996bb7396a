//! End-to-end tests
//!
//! A real gateway server in front of wiremock upstreams, driven over HTTP.

use crate::helpers::*;
use gateway_core::RequestStatus;
use gateway_providers::default_factories;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "upstream-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })
}

fn chunk(content: &str) -> String {
    json!({
        "id": "c",
        "object": "chat.completion.chunk",
        "created": 1,
        "model": "m",
        "choices": [{"index": 0, "delta": {"content": content}}]
    })
    .to_string()
}

async fn buffered_upstream(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
        .mount(&server)
        .await;
    server
}

fn user_message(stream: bool) -> Value {
    json!({
        "messages": [{"role": "user", "content": "What is the capital of France?"}],
        "stream": stream,
        "temperature": 0.2
    })
}

async fn register(server: &TestServer, name: &str, base_url: &str) {
    let response = server
        .post_json(
            "/api/v1/providers",
            &json!({"name": name, "type": "vllm", "base_url": base_url, "timeout": "5s"}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn test_e2e_register_then_chat() {
    let upstream = buffered_upstream("Paris").await;
    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;

    register(&server, "local", &upstream.uri()).await;

    let response = server
        .post_json("/api/v1/models/local/chat", &user_message(false))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["choices"][0]["message"]["content"], "Paris");
    assert_eq!(body["usage"]["total_tokens"], 5);

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RequestStatus::Success);
    assert_eq!(logs[0].response_content, "Paris");
    assert_eq!(logs[0].total_tokens, 5);
}

#[tokio::test]
async fn test_e2e_streaming_chat() {
    let upstream = MockServer::start().await;
    let body: String = [chunk("Pa"), chunk("ris"), "[DONE]".to_string()]
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;
    register(&server, "local", &upstream.uri()).await;

    let events = server
        .post_streaming("/api/v1/models/local/chat", &user_message(true))
        .await;
    assert_eq!(events.len(), 3);
    let first: Value = serde_json::from_str(&events[0]).expect("chunk json");
    assert_eq!(first["choices"][0]["delta"]["content"], "Pa");
    let second: Value = serde_json::from_str(&events[1]).expect("chunk json");
    assert_eq!(second["choices"][0]["delta"]["content"], "ris");
    assert_eq!(events[2], "[DONE]");

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].response_content, "Paris");
}

#[tokio::test]
async fn test_e2e_upstream_failure_maps_to_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("exploded"))
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;
    register(&server, "local", &upstream.uri()).await;

    let response = server
        .post_json("/api/v1/models/local/chat", &user_message(false))
        .await;
    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.expect("json");
    assert!(body["error"]["message"].as_str().is_some());

    let logs = gateway.logs_after(1).await;
    assert_eq!(logs[0].status, RequestStatus::Error);
}

#[tokio::test]
async fn test_e2e_update_switches_upstream() {
    let first = buffered_upstream("from-first").await;
    let second = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("from-second")))
        .mount(&second)
        .await;

    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;
    register(&server, "local", &first.uri()).await;

    let chat = |server: &TestServer| {
        let request = user_message(false);
        let url = server.url("/api/v1/models/local/chat");
        let client = server.client.clone();
        async move {
            let body: Value = client
                .post(url)
                .json(&request)
                .send()
                .await
                .expect("send")
                .json()
                .await
                .expect("json");
            body["choices"][0]["message"]["content"].clone()
        }
    };

    assert_eq!(chat(&server).await, "from-first");

    let response = server
        .put_json(
            "/api/v1/providers/local",
            &json!({"base_url": second.uri(), "api_key": "sk-second"}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["api_key"], "********");

    assert_eq!(chat(&server).await, "from-second");
}

#[tokio::test]
async fn test_e2e_disable_and_ready() {
    let upstream = buffered_upstream("ok").await;
    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;

    assert_eq!(server.get("/ready").await.status().as_u16(), 503);
    register(&server, "local", &upstream.uri()).await;
    assert_eq!(server.get("/ready").await.status().as_u16(), 200);

    let response = server
        .post_json("/api/v1/admin/providers/local/disable", &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let response = server
        .post_json("/api/v1/models/local/chat", &user_message(false))
        .await;
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(server.get("/ready").await.status().as_u16(), 503);

    let models: Value = server.get("/api/v1/models").await.json().await.expect("json");
    assert_eq!(models["data"], json!([]));
}

#[tokio::test]
async fn test_e2e_metrics_reflect_traffic() {
    let upstream = buffered_upstream("ok").await;
    let gateway = TestGateway::new(default_factories());
    let server = TestServer::start(gateway.app_state()).await;
    register(&server, "local", &upstream.uri()).await;

    server
        .post_json("/api/v1/models/local/chat", &user_message(false))
        .await;
    gateway.logs_after(1).await;

    let mut text = String::new();
    for _ in 0..50 {
        text = server.get("/metrics").await.text().await.expect("text");
        if text.contains("gateway_request_logs_written_total 1") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(text.contains("gateway_chat_requests_total"));
    assert!(text.contains(r#"provider="local""#));
    assert!(text.contains("gateway_live_providers 1"));
    assert!(text.contains("gateway_request_logs_written_total 1"));
}
