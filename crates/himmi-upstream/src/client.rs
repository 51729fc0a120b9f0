use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::provider::{ChatChunk, Completion, CompletionRequest, Provider};
use himmi_core::{GatewayError, Result};

/// Map a catalog provider display name to its upstream protocol family.
/// Unknown names fall through to the lowercased display name; if no adapter
/// answers to that, the call surfaces an upstream error.
pub fn canonical_provider(display_name: &str) -> String {
    match display_name {
        "Google AI" => "gemini".into(),
        "OpenAI" => "openai".into(),
        "Anthropic" => "anthropic".into(),
        "Groq" => "groq".into(),
        "Perplexity" => "perplexity".into(),
        "Mistral AI" | "Mistral" => "mistral".into(),
        "xAI" => "xai".into(),
        "DeepSeek" => "deepseek".into(),
        "Ollama" => "ollama".into(),
        other => other.to_lowercase(),
    }
}

/// Dispatches requests to the adapter registered for a canonical provider
/// family. Built once at startup and shared process-wide.
#[derive(Default)]
pub struct UpstreamClient {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Answers for every family when set — simulator mode.
    catch_all: Option<Arc<dyn Provider>>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, canonical: &str, provider: Arc<dyn Provider>) {
        info!(provider = canonical, "registered upstream provider");
        self.providers.insert(canonical.to_string(), provider);
    }

    /// Route every family to one provider regardless of registration.
    pub fn with_catch_all(mut self, provider: Arc<dyn Provider>) -> Self {
        self.catch_all = Some(provider);
        self
    }

    fn provider(&self, canonical: &str) -> Result<Arc<dyn Provider>> {
        if let Some(p) = self.catch_all.as_ref() {
            return Ok(Arc::clone(p));
        }
        self.providers
            .get(canonical)
            .map(Arc::clone)
            .ok_or_else(|| {
                GatewayError::Upstream(format!("no upstream adapter for provider '{canonical}'"))
            })
    }

    pub async fn complete(
        &self,
        canonical: &str,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        self.provider(canonical)?.complete(request).await
    }

    pub async fn stream(
        &self,
        canonical: &str,
        request: &CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>> {
        self.provider(canonical)?.stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatorProvider;
    use himmi_core::ChatMessage;

    #[test]
    fn test_canonicalization_table() {
        assert_eq!(canonical_provider("Google AI"), "gemini");
        assert_eq!(canonical_provider("Mistral AI"), "mistral");
        assert_eq!(canonical_provider("Mistral"), "mistral");
        assert_eq!(canonical_provider("xAI"), "xai");
        assert_eq!(canonical_provider("OpenAI"), "openai");
        assert_eq!(canonical_provider("DeepSeek"), "deepseek");
        // Unknown names fall through to lowercase.
        assert_eq!(canonical_provider("Acme Cloud"), "acme cloud");
    }

    #[tokio::test]
    async fn test_unregistered_family_is_an_upstream_error() {
        let client = UpstreamClient::new();
        let req = CompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        let err = client.complete("acme cloud", &req).await.unwrap_err();
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_catch_all_answers_any_family() {
        let client = UpstreamClient::new().with_catch_all(Arc::new(SimulatorProvider));
        let req = CompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        assert!(client.complete("acme cloud", &req).await.is_ok());
        assert!(client.complete("openai", &req).await.is_ok());
    }
}
