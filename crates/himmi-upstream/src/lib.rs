//! # himmi-upstream
//!
//! Abstraction layer over upstream LLM provider APIs. Every provider exposes
//! the same two operations — a completed response or a stream of chunks —
//! and normalizes its wire format into the OpenAI chunk shape the gateway
//! serves to clients.

pub mod anthropic;
pub mod client;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod simulator;
mod sse;

pub use anthropic::AnthropicProvider;
pub use client::{UpstreamClient, canonical_provider};
pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatProvider;
pub use provider::{ChatChunk, ChunkChoice, ChunkDelta, Completion, CompletionRequest, Provider};
pub use simulator::SimulatorProvider;
