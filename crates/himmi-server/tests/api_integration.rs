//! HTTP API integration tests — exercise the endpoints with mock upstreams.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use himmi_core::Usage;
use himmi_db::keys::hash_api_key;
use himmi_db::{GatewayStore, MemStore};
use himmi_pipeline::Pipeline;
use himmi_upstream::mock::{MockProvider, MockResponse};
use himmi_upstream::{SimulatorProvider, UpstreamClient};

const RAW_KEY: &str = "sk-or-v1-streamkey";

/// A router over a seeded store and one mock OpenAI upstream.
fn setup(credits: f64, mock: MockProvider) -> (axum::Router, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let tenant_id = store.add_tenant(credits);
    let user_id = store.add_user(Some(tenant_id));
    store.add_api_key(user_id, &hash_api_key(RAW_KEY));
    store.add_route("openai/gpt-4o", "OpenAI", 5.0, 15.0);

    let mut upstream = UpstreamClient::new();
    upstream.register("openai", Arc::new(mock));

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store) as Arc<dyn GatewayStore>,
        Arc::new(upstream),
    ));
    (himmi_server::build_router(pipeline, false), store)
}

fn completion_request(auth: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions").header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn chat_body(stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": "openai/gpt-4o",
        "messages": [{"role": "user", "content": "Hi"}],
        "stream": stream,
    })
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Health ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "healthy");
}

// ── Auth header parsing ────────────────────────────────────────

#[tokio::test]
async fn test_missing_auth_header_is_401() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let resp = app
        .oneshot(completion_request(None, &chat_body(false)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(resp).await["detail"],
        "Missing or invalid Authorization header"
    );
}

#[tokio::test]
async fn test_non_bearer_auth_header_is_401() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let resp = app
        .oneshot(completion_request(Some("Basic dXNlcg=="), &chat_body(false)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_key_is_403_with_detail() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let resp = app
        .oneshot(completion_request(
            Some("Bearer sk-or-v1-bogus"),
            &chat_body(false),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["detail"], "Invalid or disabled API Key");
}

#[tokio::test]
async fn test_zero_credits_is_403_with_detail() {
    let (app, _) = setup(0.0, MockProvider::new("openai"));
    let resp = app
        .oneshot(completion_request(
            Some(&format!("Bearer {RAW_KEY}")),
            &chat_body(false),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["detail"], "Insufficient credits");
}

// ── Body validation ────────────────────────────────────────────

#[tokio::test]
async fn test_empty_messages_is_400() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let body = serde_json::json!({"model": "openai/gpt-4o", "messages": []});
    let resp = app
        .oneshot(completion_request(Some(&format!("Bearer {RAW_KEY}")), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Non-streaming completions ──────────────────────────────────

#[tokio::test]
async fn test_non_stream_envelope_and_billing() {
    let mock = MockProvider::new("openai")
        .with_mock_response(MockResponse::text("Hello world!").with_usage(Usage::new(10, 20)));
    let (app, store) = setup(1.0, mock);

    let resp = app
        .oneshot(completion_request(
            Some(&format!("Bearer {RAW_KEY}")),
            &chat_body(false),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let data = body_json(resp).await;
    assert_eq!(data["object"], "chat.completion");
    assert_eq!(data["model"], "openai/gpt-4o");
    assert_eq!(data["choices"][0]["message"]["content"], "Hello world!");
    assert_eq!(data["choices"][0]["finish_reason"], "stop");
    assert_eq!(data["usage"]["prompt_tokens"], 10);
    assert_eq!(data["usage"]["completion_tokens"], 20);
    assert!(data["id"].as_str().unwrap().starts_with("chatcmpl-"));

    // (10×5 + 20×15)/1e6 deducted from the tenant.
    let credits = store.tenant_credits(1).unwrap();
    assert!((credits - (1.0 - 0.00035)).abs() < 1e-12);
}

#[tokio::test]
async fn test_model_unsupported_is_403() {
    let (app, _) = setup(1.0, MockProvider::new("openai"));
    let body = serde_json::json!({
        "model": "nonexistent",
        "messages": [{"role": "user", "content": "Hi"}],
    });
    let resp = app
        .oneshot(completion_request(Some(&format!("Bearer {RAW_KEY}")), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(resp).await["detail"],
        "Model not supported or mapping missing"
    );
}

// ── Streaming ──────────────────────────────────────────────────

#[tokio::test]
async fn test_streaming_sse_lines_end_with_done() {
    let mock = MockProvider::new("openai").with_mock_response(
        MockResponse::text("streamed words here").with_usage(Usage::new(10, 20)),
    );
    let (app, store) = setup(1.0, mock);

    let resp = app
        .oneshot(completion_request(
            Some(&format!("Bearer {RAW_KEY}")),
            &chat_body(true),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = body_string(resp).await;
    let data_lines: Vec<&str> = body
        .lines()
        .filter(|l| l.starts_with("data: "))
        .collect();
    // Three words, a terminal usage chunk, then [DONE].
    assert_eq!(data_lines.len(), 5);
    assert_eq!(*data_lines.last().unwrap(), "data: [DONE]");

    // Every non-terminator line is a JSON chunk object.
    for line in &data_lines[..4] {
        let chunk: serde_json::Value =
            serde_json::from_str(line.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");
    }

    // Billing settles once the stream is drained.
    let mut credits = store.tenant_credits(1).unwrap();
    for _ in 0..100 {
        if (credits - 1.0).abs() > 1e-15 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        credits = store.tenant_credits(1).unwrap();
    }
    assert!((credits - (1.0 - 0.00035)).abs() < 1e-12);
}

// ── Simulator mode ─────────────────────────────────────────────

#[tokio::test]
async fn test_simulator_catch_all_serves_any_catalog_model() {
    let store = Arc::new(MemStore::new());
    let tenant_id = store.add_tenant(1.0);
    let user_id = store.add_user(Some(tenant_id));
    store.add_api_key(user_id, &hash_api_key(RAW_KEY));
    store.add_route("openai/gpt-4o", "OpenAI", 5.0, 15.0);

    let upstream = UpstreamClient::new().with_catch_all(Arc::new(SimulatorProvider));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store) as Arc<dyn GatewayStore>,
        Arc::new(upstream),
    ));
    let app = himmi_server::build_router(pipeline, false);

    let resp = app
        .oneshot(completion_request(
            Some(&format!("Bearer {RAW_KEY}")),
            &chat_body(false),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let data = body_json(resp).await;
    assert!(
        data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap()
            .contains("Himmi Simulator Mode")
    );
}
