use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use himmi_core::{ChatMessage, GatewayError, Usage};
use himmi_db::{NewEvaluationPair, NewRequestLog, RouteTarget};
use himmi_upstream::ChatChunk;

/// The inputs the HTTP surface hands to the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub raw_api_key: String,
    pub model_slug: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub shadow_mode: bool,
}

/// Transient per-request state threaded through the stages. Holds values and
/// identifiers only — never live store handles.
pub struct RequestContext {
    pub request_id: Uuid,
    pub raw_api_key: String,
    pub model_slug: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub shadow_mode: bool,

    // Identity, resolved by auth.
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub tenant_id: Option<i64>,

    // Routing, resolved by route.
    pub route: Option<RouteTarget>,
    /// Decrypted tenant-supplied upstream key, when one exists.
    pub upstream_key: Option<String>,

    pub started_at: Option<Instant>,
    pub latency_ms: i32,
    pub is_cached: bool,

    // Outputs.
    pub response_content: Option<String>,
    pub stream_rx: Option<mpsc::Receiver<ChatChunk>>,
    pub usage: Option<Usage>,
    pub shadow_model: Option<String>,
    pub shadow_response: Option<String>,
    pub error: Option<GatewayError>,

    // Telemetry built by the log stage, dispatched by the caller.
    pub pending_log: Option<NewRequestLog>,
    pub pending_evaluation: Option<NewEvaluationPair>,
}

impl RequestContext {
    pub fn new(input: PipelineRequest) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            raw_api_key: input.raw_api_key,
            model_slug: input.model_slug,
            messages: input.messages,
            stream: input.stream,
            shadow_mode: input.shadow_mode,
            user_id: None,
            api_key_id: None,
            tenant_id: None,
            route: None,
            upstream_key: None,
            started_at: None,
            latency_ms: 0,
            is_cached: false,
            response_content: None,
            stream_rx: None,
            usage: None,
            shadow_model: None,
            shadow_response: None,
            error: None,
            pending_log: None,
            pending_evaluation: None,
        }
    }

    /// The upstream's own model name: the tail of the slug.
    pub fn upstream_model_name(&self) -> &str {
        self.model_slug.rsplit('/').next().unwrap_or(&self.model_slug)
    }
}

/// What a stage changed. Unset fields leave the context untouched; a stage
/// that observed a short-circuit returns `ContextPatch::default()`.
#[derive(Default)]
pub struct ContextPatch {
    pub started_at: Option<Instant>,
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub route: Option<RouteTarget>,
    pub upstream_key: Option<String>,
    pub is_cached: Option<bool>,
    pub response_content: Option<String>,
    pub stream_rx: Option<mpsc::Receiver<ChatChunk>>,
    pub usage: Option<Usage>,
    pub shadow_model: Option<String>,
    pub shadow_response: Option<String>,
    pub latency_ms: Option<i32>,
    pub error: Option<GatewayError>,
    /// Fallback recovered: drop the error carried so far.
    pub clear_error: bool,
    pub pending_log: Option<NewRequestLog>,
    pub pending_evaluation: Option<NewEvaluationPair>,
}

impl ContextPatch {
    pub fn error(error: GatewayError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn merge_into(self, ctx: &mut RequestContext) {
        if let Some(v) = self.started_at {
            ctx.started_at = Some(v);
        }
        if let Some(v) = self.user_id {
            ctx.user_id = Some(v);
        }
        if let Some(v) = self.api_key_id {
            ctx.api_key_id = Some(v);
        }
        if let Some(v) = self.tenant_id {
            ctx.tenant_id = Some(v);
        }
        if let Some(v) = self.route {
            ctx.route = Some(v);
        }
        if let Some(v) = self.upstream_key {
            ctx.upstream_key = Some(v);
        }
        if let Some(v) = self.is_cached {
            ctx.is_cached = v;
        }
        if let Some(v) = self.response_content {
            ctx.response_content = Some(v);
        }
        if let Some(v) = self.stream_rx {
            ctx.stream_rx = Some(v);
        }
        if let Some(v) = self.usage {
            ctx.usage = Some(v);
        }
        if let Some(v) = self.shadow_model {
            ctx.shadow_model = Some(v);
        }
        if let Some(v) = self.shadow_response {
            ctx.shadow_response = Some(v);
        }
        if let Some(v) = self.latency_ms {
            ctx.latency_ms = v;
        }
        if self.clear_error {
            ctx.error = None;
        }
        if let Some(v) = self.error {
            ctx.error = Some(v);
        }
        if let Some(v) = self.pending_log {
            ctx.pending_log = Some(v);
        }
        if let Some(v) = self.pending_evaluation {
            ctx.pending_evaluation = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PipelineRequest {
        PipelineRequest {
            raw_api_key: "sk-or-v1-x".into(),
            model_slug: "openai/gpt-4o".into(),
            messages: vec![ChatMessage::user("hi")],
            stream: false,
            shadow_mode: false,
        }
    }

    #[test]
    fn test_upstream_model_name_is_slug_tail() {
        let ctx = RequestContext::new(input());
        assert_eq!(ctx.upstream_model_name(), "gpt-4o");

        let mut bare = input();
        bare.model_slug = "gpt-4o".into();
        assert_eq!(RequestContext::new(bare).upstream_model_name(), "gpt-4o");
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let mut ctx = RequestContext::new(input());
        ctx.user_id = Some(7);
        ctx.error = Some(GatewayError::ModelUnsupported);
        ContextPatch::default().merge_into(&mut ctx);
        assert_eq!(ctx.user_id, Some(7));
        assert!(ctx.error.is_some());
    }

    #[test]
    fn test_clear_error_then_set_prefers_new_error() {
        let mut ctx = RequestContext::new(input());
        ctx.error = Some(GatewayError::Upstream("first".into()));

        let patch = ContextPatch {
            clear_error: true,
            ..Default::default()
        };
        patch.merge_into(&mut ctx);
        assert!(ctx.error.is_none());

        let patch = ContextPatch {
            clear_error: true,
            error: Some(GatewayError::Upstream("second".into())),
            ..Default::default()
        };
        patch.merge_into(&mut ctx);
        assert!(matches!(ctx.error, Some(GatewayError::Upstream(ref m)) if m == "second"));
    }
}
