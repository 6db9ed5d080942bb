//! Dispatcher retry and deadline behavior, verified by counting the
//! requests a mock backend actually receives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use retort::agents::AgentId;
use retort::dispatch::{AgentInvocation, Dispatcher, InvocationStatus};
use retort::gateway::{BackendId, ChatOptions, Message, ModelGateway, OpenAiCompatAdapter};

fn gateway_for(server: &MockServer, backend: &str) -> Arc<ModelGateway> {
    let adapter = OpenAiCompatAdapter::new(
        backend,
        "test-key",
        server.uri(),
        "test-model",
        Duration::from_secs(30),
    )
    .unwrap();
    let mut gateway = ModelGateway::new();
    gateway.register_chat(BackendId::new(backend), Arc::new(adapter));
    Arc::new(gateway)
}

fn dispatcher(gateway: Arc<ModelGateway>, per_call: Duration) -> Dispatcher {
    Dispatcher::new(
        gateway,
        2,
        Duration::from_millis(20),
        per_call,
        Duration::from_secs(10),
    )
}

fn invocation(backend: &str) -> AgentInvocation {
    AgentInvocation::new(
        AgentId::new("test_agent"),
        BackendId::new(backend),
        vec![Message::user("q")],
        ChatOptions::default(),
    )
}

fn ok_body() -> serde_json::Value {
    json!({"choices": [{"message": {"content": "ok"}}]})
}

#[tokio::test]
async fn always_timing_out_backend_is_timed_out_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let out = dispatcher(gateway_for(&server, "slow"), Duration::from_millis(150))
        .dispatch(vec![invocation("slow")])
        .await;

    assert_eq!(out[0].status, InvocationStatus::TimedOut);
    assert_eq!(out[0].attempts, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn retryable_500_consumes_full_budget_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let out = dispatcher(gateway_for(&server, "flaky"), Duration::from_secs(5))
        .dispatch(vec![invocation("flaky")])
        .await;

    assert!(matches!(out[0].status, InvocationStatus::Failed { .. }));
    assert_eq!(out[0].attempts, 3);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "bad key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let out = dispatcher(gateway_for(&server, "locked"), Duration::from_secs(5))
        .dispatch(vec![invocation("locked")])
        .await;

    assert!(matches!(
        out[0].status,
        InvocationStatus::Failed {
            code: "auth_error",
            ..
        }
    ));
    assert_eq!(out[0].attempts, 1);
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    let out = dispatcher(gateway_for(&server, "flaky"), Duration::from_secs(5))
        .dispatch(vec![invocation("flaky")])
        .await;

    assert!(out[0].succeeded());
    assert_eq!(out[0].attempts, 2);
    assert_eq!(out[0].answer.as_deref(), Some("ok"));
}

#[tokio::test]
async fn concurrent_invocations_are_isolated() {
    let fast = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .mount(&fast)
        .await;

    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "bad key"}
        })))
        .mount(&broken)
        .await;

    let fast_adapter = OpenAiCompatAdapter::new(
        "fast",
        "test-key",
        fast.uri(),
        "test-model",
        Duration::from_secs(30),
    )
    .unwrap();
    let broken_adapter = OpenAiCompatAdapter::new(
        "broken",
        "test-key",
        broken.uri(),
        "test-model",
        Duration::from_secs(30),
    )
    .unwrap();
    let mut gateway = ModelGateway::new();
    gateway.register_chat(BackendId::new("fast"), Arc::new(fast_adapter));
    gateway.register_chat(BackendId::new("broken"), Arc::new(broken_adapter));

    let out = dispatcher(Arc::new(gateway), Duration::from_secs(5))
        .dispatch(vec![invocation("broken"), invocation("fast")])
        .await;

    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|i| i.status.is_terminal()));
    assert_eq!(out.iter().filter(|i| i.succeeded()).count(), 1);
}
