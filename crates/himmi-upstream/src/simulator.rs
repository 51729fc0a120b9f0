//! Deterministic provider for offline testing.
//!
//! Enabled by `HIMMI_SIMULATOR=true`. Returns a canned response with
//! synthetic token counts; streaming yields the content word-by-word with a
//! small interval and a terminal usage chunk.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::provider::*;
use himmi_core::{Result, Usage};

const WORD_INTERVAL: Duration = Duration::from_millis(50);

pub struct SimulatorProvider;

fn canned_content(model: &str) -> String {
    format!("Hey there! I'm {model}, running in Himmi Simulator Mode.")
}

#[async_trait]
impl Provider for SimulatorProvider {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        Ok(Completion {
            content: canned_content(&request.model),
            usage: Usage::new(10, 20),
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let model = request.model.clone();

        tokio::spawn(async move {
            let chunk_id = format!("chatcmpl-{}", Uuid::new_v4());
            let content = canned_content(&model);
            let words: Vec<&str> = content.split(' ').collect();
            let word_count = words.len() as u32;

            for word in words {
                let chunk = ChatChunk::content(&chunk_id, &model, format!("{word} "));
                if tx.send(chunk).await.is_err() {
                    return;
                }
                tokio::time::sleep(WORD_INTERVAL).await;
            }

            let _ = tx
                .send(ChatChunk::finish(
                    &chunk_id,
                    &model,
                    "stop",
                    Some(Usage::new(10, word_count)),
                ))
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use himmi_core::ChatMessage;

    fn request() -> CompletionRequest {
        CompletionRequest::new("gpt-4o", vec![ChatMessage::user("Hi")])
    }

    #[tokio::test]
    async fn test_complete_is_deterministic() {
        let provider = SimulatorProvider;
        let a = provider.complete(&request()).await.unwrap();
        let b = provider.complete(&request()).await.unwrap();
        assert_eq!(a.content, b.content);
        assert!(a.content.contains("gpt-4o"));
        assert_eq!(a.usage, Usage::new(10, 20));
    }

    #[tokio::test]
    async fn test_stream_yields_words_then_usage() {
        let provider = SimulatorProvider;
        let mut rx = provider.stream(&request()).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }

        let last = chunks.last().unwrap();
        let usage = last.usage.expect("terminal chunk carries usage");
        assert_eq!(usage.prompt_tokens, 10);
        // One content chunk per word plus the terminal chunk.
        assert_eq!(chunks.len() as u32, usage.completion_tokens + 1);
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));

        let text: String = chunks.iter().map(|c| c.content_text()).collect();
        assert!(text.contains("Himmi Simulator Mode"));
    }

    #[tokio::test]
    async fn test_stream_stops_when_consumer_drops() {
        let provider = SimulatorProvider;
        let mut rx = provider.stream(&request()).await.unwrap();
        let first = rx.recv().await;
        assert!(first.is_some());
        drop(rx);
        // The producer task exits on its next send; nothing to assert beyond
        // not hanging.
        tokio::task::yield_now().await;
    }
}
