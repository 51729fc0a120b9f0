//! # himmi-pipeline
//!
//! The request-processing core of the gateway: a staged state machine run
//! once per request. Each stage reads the current [`RequestContext`], returns
//! a [`ContextPatch`], and the engine merges it and follows the graph:
//!
//! ```text
//! init → auth → cache_lookup
//!                 │
//!      cached ───┴─── uncached
//!         │              │
//!         ▼              ▼
//!      billing ←──── route → llm
//!                            │
//!                       ok ──┴── provider-error
//!                        │          │
//!                        ▼          ▼
//!                      billing   fallback → billing
//!                        │
//!                        ▼
//!                   cache_store → log → END
//! ```
//!
//! Streaming responses defer billing to a wrapper around the chunk channel
//! whose release path settles whatever tokens were actually delivered, even
//! when the client disconnects mid-stream.

mod billing;
mod context;
mod engine;
mod stages;
mod stream_billing;

pub use billing::SettledRegistry;
pub use context::{ContextPatch, PipelineRequest, RequestContext};
pub use engine::{Pipeline, Stage};
