use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::openai::upstream_timeout;
use crate::provider::*;
use himmi_core::{GatewayError, Result, Usage};

/// Local Ollama daemon provider. No API key; streaming is JSON-lines rather
/// than SSE.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": &request.model,
            "messages": &request.messages,
            "stream": stream,
        });

        let send_fut = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.timeout, send_fut)
            .await
            .map_err(|_| upstream_timeout("ollama", self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(format!("HTTP {status}: {text}")));
        }
        Ok(resp)
    }
}

fn ollama_usage(data: &serde_json::Value) -> Usage {
    Usage::new(
        data["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
        data["eval_count"].as_u64().unwrap_or(0) as u32,
    )
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let resp = self.send(request, false).await?;
        let data = tokio::time::timeout(self.timeout, resp.json::<serde_json::Value>())
            .await
            .map_err(|_| upstream_timeout("ollama", self.timeout))?
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        Ok(Completion {
            content: data["message"]["content"].as_str().unwrap_or("").to_string(),
            usage: ollama_usage(&data),
        })
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
            let mut buffer = String::new();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(provider = "ollama", error = %e, "upstream stream error");
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&line) else {
                        continue;
                    };

                    if event["done"].as_bool().unwrap_or(false) {
                        let chunk = ChatChunk::finish(
                            &chunk_id,
                            &model,
                            "stop",
                            Some(ollama_usage(&event)),
                        );
                        let _ = tx.send(chunk).await;
                        return;
                    }
                    if let Some(text) = event["message"]["content"].as_str()
                        && !text.is_empty()
                        && tx
                            .send(ChatChunk::content(&chunk_id, &model, text))
                            .await
                            .is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
