use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::openai::upstream_timeout;
use crate::provider::*;
use crate::sse::SseLineBuffer;
use himmi_core::{ChatMessage, GatewayError, Result, Role, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The messages API requires max_tokens; chat clients don't send one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    platform_key: Option<String>,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(platform_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com/v1".into(),
            platform_key,
            timeout,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn resolve_key(&self, request: &CompletionRequest) -> Result<String> {
        request
            .api_key
            .clone()
            .or_else(|| self.platform_key.clone())
            .ok_or_else(|| {
                GatewayError::Upstream("no API key configured for provider 'anthropic'".into())
            })
    }

    /// System turns move to the top-level `system` field; the rest become
    /// user/assistant messages.
    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<&ChatMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let mut body = serde_json::json!({
            "model": &request.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n"));
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let api_key = self.resolve_key(request)?;
        let body = self.build_body(request, stream);

        let send_fut = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.timeout, send_fut)
            .await
            .map_err(|_| upstream_timeout("anthropic", self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(format!("HTTP {status}: {text}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let resp = self.send(request, false).await?;
        let data = tokio::time::timeout(self.timeout, resp.json::<serde_json::Value>())
            .await
            .map_err(|_| upstream_timeout("anthropic", self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = Usage::new(
            data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        );

        Ok(Completion { content, usage })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>> {
        let resp = self.send(request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let model = request.model.clone();

        tokio::spawn(async move {
            let chunk_id = format!("chatcmpl-{}", Uuid::new_v4());
            let mut stream = resp.bytes_stream();
            let mut buffer = SseLineBuffer::default();
            let mut prompt_tokens = 0u32;
            let mut completion_tokens = 0u32;

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(provider = "anthropic", error = %e, "upstream stream error");
                        return;
                    }
                };
                for payload in buffer.push(&bytes) {
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                        continue;
                    };
                    match event["type"].as_str() {
                        Some("message_start") => {
                            if let Some(it) = event["message"]["usage"]["input_tokens"].as_u64() {
                                prompt_tokens = it as u32;
                            }
                        }
                        Some("content_block_delta") => {
                            if let Some(text) = event["delta"]["text"].as_str() {
                                let chunk = ChatChunk::content(&chunk_id, &model, text);
                                if tx.send(chunk).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some("message_delta") => {
                            if let Some(ot) = event["usage"]["output_tokens"].as_u64() {
                                completion_tokens = ot as u32;
                            }
                        }
                        Some("message_stop") => {
                            let chunk = ChatChunk::finish(
                                &chunk_id,
                                &model,
                                "stop",
                                Some(Usage::new(prompt_tokens, completion_tokens)),
                            );
                            let _ = tx.send(chunk).await;
                            return;
                        }
                        Some("error") => {
                            warn!(
                                provider = "anthropic",
                                error = %event["error"]["message"].as_str().unwrap_or("unknown"),
                                "upstream mid-stream error"
                            );
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}
