use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use himmi_core::{ChatMessage, Result, Usage};

/// A request to an upstream provider. `model` is the upstream's own model
/// name (the routing slug's tail), never the client-facing slug.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tenant-supplied upstream key. Overrides the platform key when present.
    pub api_key: Option<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// A completed (non-streaming) upstream response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// One streamed chunk, normalized to the OpenAI wire shape. Chunks are
/// serialized raw onto the client's SSE stream, so the field names here are
/// the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Some providers report usage only on the terminal chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatChunk {
    /// A content delta chunk.
    pub fn content(id: &str, model: &str, text: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            object: chunk_object(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: Some(text.into()),
                },
                finish_reason: None,
                index: 0,
            }],
            usage: None,
        }
    }

    /// The terminal chunk: empty delta, a finish reason, optional usage.
    pub fn finish(id: &str, model: &str, reason: &str, usage: Option<Usage>) -> Self {
        Self {
            id: id.to_string(),
            object: chunk_object(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                delta: ChunkDelta::default(),
                finish_reason: Some(reason.to_string()),
                index: 0,
            }],
            usage,
        }
    }

    /// Concatenated content deltas in this chunk.
    pub fn content_text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

/// Trait implemented by each upstream adapter (OpenAI-compatible, Anthropic,
/// Gemini, Ollama, simulator).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Canonical family name, e.g. "openai", "gemini".
    fn name(&self) -> &str;

    /// Send a non-streaming request and wait for the full response.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Send a streaming request. The receiver yields normalized chunks; the
    /// channel closes when the upstream finishes or fails mid-stream.
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_round_trips_openai_shape() {
        let raw = r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","model":"gpt-4o",
            "choices":[{"delta":{"content":"Hi"},"finish_reason":null,"index":0}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.content_text(), "Hi");
        assert!(chunk.usage.is_none());

        let out = serde_json::to_value(&chunk).unwrap();
        assert_eq!(out["choices"][0]["delta"]["content"], "Hi");
        // Absent usage is omitted entirely, not serialized as null.
        assert!(out.get("usage").is_none());
    }

    #[test]
    fn test_terminal_chunk_carries_usage() {
        let chunk = ChatChunk::finish("id", "m", "stop", Some(Usage::new(10, 20)));
        let out = serde_json::to_value(&chunk).unwrap();
        assert_eq!(out["usage"]["prompt_tokens"], 10);
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_chunk_tolerates_missing_fields() {
        let chunk: ChatChunk = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.content_text(), "");
    }
}
