use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::openai::upstream_timeout;
use crate::provider::*;
use crate::sse::SseLineBuffer;
use himmi_core::{GatewayError, Result, Role, Usage};

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    platform_key: Option<String>,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(platform_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
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
                GatewayError::Upstream("no API key configured for provider 'gemini'".into())
            })
    }

    /// Gemini has no system role in `contents` and calls the assistant
    /// "model"; system turns move to `systemInstruction`.
    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut contents = Vec::new();
        let mut system = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system.push(msg.content.as_str()),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
                Role::Assistant => contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{"text": msg.content}],
                })),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system.join("\n")}],
            });
        }
        body
    }
}

fn candidate_text(data: &serde_json::Value) -> String {
    data["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn usage_metadata(data: &serde_json::Value) -> Usage {
    Usage::new(
        data["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
        data["usageMetadata"]["candidatesTokenCount"]
            .as_u64()
            .unwrap_or(0) as u32,
    )
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let api_key = self.resolve_key(request)?;
        let body = self.build_body(request);

        let fut = async {
            let resp = self
                .client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, request.model
                ))
                .header("x-goog-api-key", &api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(GatewayError::Upstream(format!("HTTP {status}: {text}")));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))
        };

        let data = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| upstream_timeout("gemini", self.timeout))??;

        Ok(Completion {
            content: candidate_text(&data),
            usage: usage_metadata(&data),
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>> {
        let api_key = self.resolve_key(request)?;
        let body = self.build_body(request);

        let send_fut = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &api_key)
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.timeout, send_fut)
            .await
            .map_err(|_| upstream_timeout("gemini", self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(format!("HTTP {status}: {text}")));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let model = request.model.clone();

        tokio::spawn(async move {
            let chunk_id = format!("chatcmpl-{}", Uuid::new_v4());
            let mut stream = resp.bytes_stream();
            let mut buffer = SseLineBuffer::default();
            let mut usage = Usage::zero();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(provider = "gemini", error = %e, "upstream stream error");
                        return;
                    }
                };
                for payload in buffer.push(&bytes) {
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                        continue;
                    };
                    // Every frame may refresh the running usage; the last
                    // frame's counts are final.
                    if event.get("usageMetadata").is_some() {
                        usage = usage_metadata(&event);
                    }
                    let text = candidate_text(&event);
                    if !text.is_empty()
                        && tx
                            .send(ChatChunk::content(&chunk_id, &model, text))
                            .await
                            .is_err()
                    {
                        return;
                    }
                    if event["candidates"][0]["finishReason"].as_str().is_some() {
                        let _ = tx
                            .send(ChatChunk::finish(&chunk_id, &model, "stop", Some(usage)))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
