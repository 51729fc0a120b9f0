//! # himmi-server
//!
//! HTTP surface for the gateway:
//!
//! - `POST /v1/chat/completions` — the OpenAI-compatible inference endpoint,
//!   streaming (SSE) and non-streaming
//! - `GET /health` — liveness probe
//!
//! The surface parses the bearer credential and request body, hands the
//! pipeline a [`PipelineRequest`], and renders the final context: a chat
//! completion envelope, an SSE stream terminated by `[DONE]`, or a
//! `{detail}` error. Request-log output is dispatched off the request path.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response, Sse, sse::Event as SseEvent},
    routing::{get, post},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use himmi_core::ChatMessage;
use himmi_pipeline::{Pipeline, PipelineRequest};
use himmi_upstream::ChatChunk;

/// Shared server state.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Chat completion request body.
#[derive(Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    shadow_mode: bool,
}

/// Error body: `{"detail": "..."}`.
#[derive(Serialize)]
struct ErrorDetail {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorDetail {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// Build the Axum router.
pub fn build_router(pipeline: Arc<Pipeline>, cors: bool) -> Router {
    let state = Arc::new(AppState { pipeline });

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let raw_api_key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(raw_api_key) = raw_api_key else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        );
    };

    if req.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "messages must not be empty");
    }

    let input = PipelineRequest {
        raw_api_key: raw_api_key.to_string(),
        model_slug: req.model.clone(),
        messages: req.messages,
        stream: req.stream,
        shadow_mode: req.shadow_mode,
    };

    let mut ctx = state.pipeline.run(input).await;
    state.pipeline.spawn_telemetry(&mut ctx);

    if let Some(error) = ctx.error.take() {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return error_response(status, error.detail());
    }

    if req.stream
        && let Some(rx) = ctx.stream_rx.take()
    {
        return Sse::new(sse_stream(rx)).into_response();
    }

    Json(serde_json::json!({
        "id": format!("chatcmpl-{}", ctx.request_id),
        "object": "chat.completion",
        "model": ctx.model_slug,
        "choices": [{
            "message": {
                "role": "assistant",
                "content": ctx.response_content.unwrap_or_default(),
            },
            "finish_reason": "stop",
            "index": 0,
        }],
        "usage": ctx.usage.unwrap_or_default(),
    }))
    .into_response()
}

/// Pipe the wrapped chunk channel out as SSE data lines, closing with
/// `[DONE]`. Dropping the receiver on client disconnect is what triggers the
/// stream-billing release path.
fn sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<ChatChunk>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            let data = serde_json::to_string(&chunk).unwrap_or_default();
            yield Ok(SseEvent::default().data(data));
        }
        yield Ok(SseEvent::default().data("[DONE]"));
    }
}

/// Start the HTTP server.
pub async fn start_server(pipeline: Arc<Pipeline>, listen: &str, cors: bool) -> himmi_core::Result<()> {
    let router = build_router(pipeline, cors);

    info!(listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| himmi_core::GatewayError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| himmi_core::GatewayError::Config(format!("server error: {e}")))?;

    Ok(())
}
