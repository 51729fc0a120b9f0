//! Mock provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls and
//! records every request it receives for assertions.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::provider::*;
use himmi_core::{GatewayError, Result, Usage};

/// A pre-configured response from the mock provider.
#[derive(Clone)]
pub struct MockResponse {
    pub content: String,
    pub usage: Usage,
    /// If set, the provider fails with this upstream error instead.
    pub error: Option<String>,
    /// Exact chunks to emit when streaming; derived from `content` if unset.
    pub chunks: Option<Vec<ChatChunk>>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: String::new(),
            usage: Usage::new(100, 50),
            error: None,
            chunks: None,
        }
    }
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            content: text.to_string(),
            ..Default::default()
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<ChatChunk>) -> Self {
        self.chunks = Some(chunks);
        self
    }
}

/// A mock upstream that replays queued responses in order.
pub struct MockProvider {
    name: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Every request received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().unwrap().push(MockResponse::text(text));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().unwrap().push(MockResponse::error(error));
        self
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().unwrap().push(resp);
        self
    }

    /// Requests recorded so far.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(GatewayError::Upstream(error));
        }

        Ok(Completion {
            content: mock.content,
            usage: mock.usage,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<ChatChunk>> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(GatewayError::Upstream(error));
        }

        let (tx, rx) = mpsc::channel(64);
        let model = request.model.clone();
        let MockResponse {
            content,
            usage,
            chunks,
            ..
        } = mock;

        tokio::spawn(async move {
            let chunk_id = format!("chatcmpl-{}", Uuid::new_v4());
            let chunks = chunks.unwrap_or_else(|| {
                let mut chunks: Vec<ChatChunk> = content
                    .split_whitespace()
                    .map(|word| ChatChunk::content(&chunk_id, &model, format!("{word} ")))
                    .collect();
                chunks.push(ChatChunk::finish(&chunk_id, &model, "stop", Some(usage)));
                chunks
            });
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
