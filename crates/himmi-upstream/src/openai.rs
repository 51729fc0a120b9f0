use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;

use crate::provider::*;
use crate::sse::SseLineBuffer;
use himmi_core::{GatewayError, Result, Usage};

/// OpenAI-compatible API provider. One instance per provider family that
/// speaks this protocol: OpenAI itself, Groq, Mistral, Perplexity, xAI,
/// DeepSeek, and any other `/chat/completions` clone.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    platform_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        platform_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            base_url: base_url.into(),
            platform_key,
            timeout,
        }
    }

    pub fn openai(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("openai", "https://api.openai.com/v1", platform_key, timeout)
    }

    pub fn groq(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", platform_key, timeout)
    }

    pub fn mistral(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("mistral", "https://api.mistral.ai/v1", platform_key, timeout)
    }

    pub fn perplexity(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("perplexity", "https://api.perplexity.ai", platform_key, timeout)
    }

    pub fn xai(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("xai", "https://api.x.ai/v1", platform_key, timeout)
    }

    pub fn deepseek(platform_key: Option<String>, timeout: Duration) -> Self {
        Self::new("deepseek", "https://api.deepseek.com/v1", platform_key, timeout)
    }

    fn resolve_key(&self, request: &CompletionRequest) -> Result<String> {
        request
            .api_key
            .clone()
            .or_else(|| self.platform_key.clone())
            .ok_or_else(|| {
                GatewayError::Upstream(format!("no API key configured for provider '{}'", self.name))
            })
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": &request.model,
            "messages": &request.messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let api_key = self.resolve_key(request)?;
        let body = self.build_body(request, false);

        let fut = async {
            let resp = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {api_key}"))
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
            .map_err(|_| upstream_timeout(&self.name, self.timeout))??;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let usage = Usage::new(
            data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        );

        Ok(Completion { content, usage })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>> {
        let api_key = self.resolve_key(request)?;
        let body = self.build_body(request, true);
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        // The timeout covers connecting and receiving response headers; the
        // body may legitimately stream for longer.
        let send_fut = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.timeout, send_fut)
            .await
            .map_err(|_| upstream_timeout(&self.name, self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(format!("HTTP {status}: {text}")));
        }

        let provider = self.name.clone();
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer = SseLineBuffer::default();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(provider = %provider, error = %e, "upstream stream error");
                        return;
                    }
                };
                for payload in buffer.push(&bytes) {
                    if payload == "[DONE]" {
                        return;
                    }
                    let Ok(chunk) = serde_json::from_str::<ChatChunk>(&payload) else {
                        continue;
                    };
                    if tx.send(chunk).await.is_err() {
                        // Consumer is gone; dropping the response body closes
                        // the upstream connection.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

pub(crate) fn upstream_timeout(provider: &str, timeout: Duration) -> GatewayError {
    GatewayError::Upstream(format!(
        "provider '{provider}' timed out after {}s",
        timeout.as_secs()
    ))
}
