use std::sync::Arc;
use tracing::warn;

use crate::billing::SettledRegistry;
use crate::context::{PipelineRequest, RequestContext};
use crate::stages;
use himmi_cache::SemanticCache;
use himmi_db::{GatewayStore, Vault};
use himmi_upstream::UpstreamClient;

/// The stages of the request graph. `End` is the single terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Auth,
    CacheLookup,
    Route,
    Llm,
    Fallback,
    Billing,
    CacheStore,
    Log,
    End,
}

impl Stage {
    /// The static graph. Two edges are conditional: after cache_lookup on
    /// the hit flag, and after llm on an upstream-tagged error.
    fn next(self, ctx: &RequestContext) -> Stage {
        match self {
            Stage::Init => Stage::Auth,
            Stage::Auth => Stage::CacheLookup,
            Stage::CacheLookup => {
                if ctx.is_cached {
                    Stage::Billing
                } else {
                    Stage::Route
                }
            }
            Stage::Route => Stage::Llm,
            Stage::Llm => {
                if ctx.error.as_ref().is_some_and(|e| e.is_upstream()) {
                    Stage::Fallback
                } else {
                    Stage::Billing
                }
            }
            Stage::Fallback => Stage::Billing,
            Stage::Billing => Stage::CacheStore,
            Stage::CacheStore => Stage::Log,
            Stage::Log | Stage::End => Stage::End,
        }
    }
}

/// The per-request state machine executor. One instance is built at startup
/// and shared across requests; all per-request state lives in the context.
pub struct Pipeline {
    pub(crate) store: Arc<dyn GatewayStore>,
    pub(crate) upstream: Arc<UpstreamClient>,
    pub(crate) cache: Option<Arc<dyn SemanticCache>>,
    pub(crate) vault: Option<Arc<Vault>>,
    pub(crate) shadow_model: String,
    pub(crate) shadow_provider: String,
    pub(crate) settled: Arc<SettledRegistry>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn GatewayStore>, upstream: Arc<UpstreamClient>) -> Self {
        Self {
            store,
            upstream,
            cache: None,
            vault: None,
            shadow_model: "llama3-8b-8192".into(),
            shadow_provider: "groq".into(),
            settled: Arc::new(SettledRegistry::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_vault(mut self, vault: Arc<Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_shadow_target(
        mut self,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        self.shadow_model = model.into();
        self.shadow_provider = provider.into();
        self
    }

    /// Run a request through the graph and return the final merged context.
    pub async fn run(&self, input: PipelineRequest) -> RequestContext {
        let mut ctx = RequestContext::new(input);
        let mut stage = Stage::Init;
        while stage != Stage::End {
            let patch = match stage {
                Stage::Init => stages::init(),
                Stage::Auth => stages::auth(self, &ctx).await,
                Stage::CacheLookup => stages::cache_lookup(self, &ctx).await,
                Stage::Route => stages::route(self, &ctx).await,
                Stage::Llm => stages::llm(self, &ctx).await,
                Stage::Fallback => stages::fallback(self, &ctx).await,
                Stage::Billing => stages::billing(self, &mut ctx).await,
                Stage::CacheStore => stages::cache_store(self, &ctx).await,
                Stage::Log => stages::log(&ctx),
                Stage::End => unreachable!(),
            };
            patch.merge_into(&mut ctx);
            stage = stage.next(&ctx);
        }
        ctx
    }

    /// Write the log stage's output synchronously. Failures are swallowed
    /// with a warning — telemetry never fails a request.
    pub async fn write_telemetry(&self, ctx: &mut RequestContext) {
        if let Some(row) = ctx.pending_log.take() {
            if let Err(e) = self.store.insert_request_log(row).await {
                warn!(request_id = %ctx.request_id, error = %e, "request log write failed");
            }
        }
        if let Some(pair) = ctx.pending_evaluation.take() {
            if let Err(e) = self.store.insert_evaluation_pair(pair).await {
                warn!(request_id = %ctx.request_id, error = %e, "evaluation pair write failed");
            }
        }
    }

    /// Dispatch the log stage's output on a background task, off the request
    /// path.
    pub fn spawn_telemetry(self: &Arc<Self>, ctx: &mut RequestContext) {
        if ctx.pending_log.is_none() && ctx.pending_evaluation.is_none() {
            return;
        }
        let pipeline = Arc::clone(self);
        let request_id = ctx.request_id;
        let row = ctx.pending_log.take();
        let pair = ctx.pending_evaluation.take();
        tokio::spawn(async move {
            if let Some(row) = row {
                if let Err(e) = pipeline.store.insert_request_log(row).await {
                    warn!(%request_id, error = %e, "request log write failed");
                }
            }
            if let Some(pair) = pair {
                if let Err(e) = pipeline.store.insert_evaluation_pair(pair).await {
                    warn!(%request_id, error = %e, "evaluation pair write failed");
                }
            }
        });
    }
}
