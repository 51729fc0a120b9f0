//! Stage implementations. Every stage observes an already-set `error` and
//! passes through unchanged, except `fallback` (which exists to handle one)
//! and `log` (which records errored requests when identity is known).

use std::time::Instant;
use tracing::{info, warn};

use crate::context::{ContextPatch, RequestContext};
use crate::engine::Pipeline;
use crate::stream_billing::{self, StreamBilling};
use himmi_core::{GatewayError, Usage, chat::last_message_content};
use himmi_db::keys::hash_api_key;
use himmi_db::{NewEvaluationPair, NewRequestLog};
use himmi_upstream::{CompletionRequest, canonical_provider};

/// Stamp the monotonic start instant. No failure modes.
pub(crate) fn init() -> ContextPatch {
    ContextPatch {
        started_at: Some(Instant::now()),
        ..Default::default()
    }
}

/// Verify the API key and check the tenant's credit balance. Runs before the
/// cache so even cached responses are attributed to a tenant.
pub(crate) async fn auth(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    let key_hash = hash_api_key(&ctx.raw_api_key);

    let auth = match p.store.authenticate(&key_hash).await {
        Ok(auth) => auth,
        Err(e) => return ContextPatch::error(e),
    };

    let Some(auth) = auth else {
        return ContextPatch::error(GatewayError::InvalidKey);
    };

    let mut patch = ContextPatch {
        user_id: Some(auth.user_id),
        api_key_id: Some(auth.api_key_id),
        tenant_id: auth.tenant_id,
        ..Default::default()
    };

    if auth.tenant_id.is_none() {
        patch.error = Some(GatewayError::TenantMisconfigured);
        return patch;
    }

    if auth.tenant_credits.unwrap_or(0.0) <= 0.0 {
        patch.error = Some(GatewayError::InsufficientCredits);
        return patch;
    }

    patch
}

/// Probe the semantic cache with the last message's content. Errors are
/// misses; a hit is a free, attributed response.
pub(crate) async fn cache_lookup(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    if ctx.error.is_some() {
        return ContextPatch::default();
    }

    let miss = ContextPatch {
        is_cached: Some(false),
        ..Default::default()
    };

    let Some(cache) = p.cache.as_ref() else {
        return miss;
    };
    let Some(prompt) = last_message_content(&ctx.messages) else {
        return miss;
    };

    match cache.lookup(prompt).await {
        Ok(Some(response)) => {
            info!(request_id = %ctx.request_id, "semantic cache hit");
            ContextPatch {
                response_content: Some(response),
                usage: Some(Usage::zero()),
                is_cached: Some(true),
                ..Default::default()
            }
        }
        Ok(None) => miss,
        Err(e) => {
            warn!(request_id = %ctx.request_id, error = %e, "cache lookup failed, treating as miss");
            miss
        }
    }
}

/// Resolve the slug to a priced provider mapping and attach the tenant's own
/// upstream key when one is on file and decrypts.
pub(crate) async fn route(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    if ctx.error.is_some() {
        return ContextPatch::default();
    }

    let target = match p.store.resolve_model(&ctx.model_slug).await {
        Ok(Some(target)) => target,
        Ok(None) => return ContextPatch::error(GatewayError::ModelUnsupported),
        Err(e) => return ContextPatch::error(e),
    };

    let canonical = canonical_provider(&target.provider_name);
    let mut patch = ContextPatch {
        route: Some(target),
        ..Default::default()
    };

    if let (Some(user_id), Some(vault)) = (ctx.user_id, p.vault.as_ref()) {
        match p.store.provider_credential(user_id, &canonical).await {
            Ok(Some(ciphertext)) => match vault.decrypt(&ciphertext) {
                Ok(key) => patch.upstream_key = Some(key),
                // Corrupt ciphertext falls back to the platform key.
                Err(e) => {
                    warn!(user_id, provider = %canonical, error = %e, "tenant credential unusable")
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(user_id, provider = %canonical, error = %e, "tenant credential lookup failed")
            }
        }
    }

    patch
}

/// The upstream call. Normal mode issues one call, streaming or not; shadow
/// mode forces non-stream and races the primary against the configured
/// shadow model, recording the shadow's answer for offline comparison.
pub(crate) async fn llm(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    if ctx.error.is_some() {
        return ContextPatch::default();
    }

    let Some(route) = ctx.route.as_ref() else {
        return ContextPatch::error(GatewayError::Upstream("no provider resolved".into()));
    };
    let canonical = canonical_provider(&route.provider_name);
    let request = CompletionRequest::new(ctx.upstream_model_name(), ctx.messages.clone())
        .with_api_key(ctx.upstream_key.clone());

    if ctx.shadow_mode {
        let shadow_request =
            CompletionRequest::new(p.shadow_model.clone(), ctx.messages.clone());
        let (primary, shadow) = tokio::join!(
            p.upstream.complete(&canonical, &request),
            p.upstream.complete(&p.shadow_provider, &shadow_request),
        );

        let completion = match primary {
            Ok(completion) => completion,
            Err(e) => return ContextPatch::error(e),
        };

        let mut patch = ContextPatch {
            response_content: Some(completion.content),
            usage: Some(completion.usage),
            ..Default::default()
        };
        match shadow {
            Ok(s) => {
                patch.shadow_model = Some(p.shadow_model.clone());
                patch.shadow_response = Some(s.content);
            }
            // A failed shadow never fails the request.
            Err(e) => {
                patch.shadow_model = Some("error".into());
                patch.shadow_response = Some(format!("Shadow Error: {e}"));
            }
        }
        return patch;
    }

    if ctx.stream {
        match p.upstream.stream(&canonical, &request).await {
            Ok(rx) => ContextPatch {
                stream_rx: Some(rx),
                ..Default::default()
            },
            Err(e) => ContextPatch::error(e),
        }
    } else {
        match p.upstream.complete(&canonical, &request).await {
            Ok(completion) => ContextPatch {
                response_content: Some(completion.content),
                usage: Some(completion.usage),
                ..Default::default()
            },
            Err(e) => ContextPatch::error(e),
        }
    }
}

/// Retry once against the next-cheapest mapping for the same slug. Reached
/// only on upstream-tagged errors. The tenant credential attached in `route`
/// belongs to the failed provider family, so the retry uses the platform key.
pub(crate) async fn fallback(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    let original = match ctx.error.as_ref() {
        Some(GatewayError::Upstream(msg)) => msg.clone(),
        _ => return ContextPatch::default(),
    };

    let Some(route) = ctx.route.as_ref() else {
        return ContextPatch::error(GatewayError::Upstream(format!(
            "{original} (fallback failed)"
        )));
    };

    let alt = match p
        .store
        .next_cheapest_mapping(&ctx.model_slug, route.mapping_id)
        .await
    {
        Ok(Some(alt)) => alt,
        Ok(None) => {
            return ContextPatch::error(GatewayError::Upstream(format!(
                "{original} (fallback failed)"
            )));
        }
        Err(e) => return ContextPatch::error(e),
    };

    let canonical = canonical_provider(&alt.provider_name);
    let provider_name = alt.provider_name.clone();
    info!(request_id = %ctx.request_id, provider = %canonical, "retrying via fallback mapping");
    let request = CompletionRequest::new(ctx.upstream_model_name(), ctx.messages.clone());

    if ctx.stream {
        match p.upstream.stream(&canonical, &request).await {
            Ok(rx) => ContextPatch {
                stream_rx: Some(rx),
                route: Some(alt),
                clear_error: true,
                ..Default::default()
            },
            Err(e) => ContextPatch::error(GatewayError::Upstream(format!(
                "{original}; fallback via '{provider_name}' failed: {e}"
            ))),
        }
    } else {
        match p.upstream.complete(&canonical, &request).await {
            Ok(completion) => ContextPatch {
                response_content: Some(completion.content),
                usage: Some(completion.usage),
                route: Some(alt),
                clear_error: true,
                ..Default::default()
            },
            Err(e) => ContextPatch::error(GatewayError::Upstream(format!(
                "{original}; fallback via '{provider_name}' failed: {e}"
            ))),
        }
    }
}

/// Settle the money. Cached requests cost nothing; streams defer to the
/// wrapper's release path; everything else settles here, atomically.
pub(crate) async fn billing(p: &Pipeline, ctx: &mut RequestContext) -> ContextPatch {
    if ctx.error.is_some() || ctx.is_cached {
        return ContextPatch::default();
    }

    let (Some(tenant_id), Some(api_key_id), Some(route)) =
        (ctx.tenant_id, ctx.api_key_id, ctx.route.clone())
    else {
        return ContextPatch::default();
    };

    if let Some(rx) = ctx.stream_rx.take() {
        let wrapped = stream_billing::wrap(
            rx,
            StreamBilling {
                store: std::sync::Arc::clone(&p.store),
                registry: std::sync::Arc::clone(&p.settled),
                request_id: ctx.request_id,
                tenant_id,
                api_key_id,
                input_token_cost: route.input_token_cost,
                output_token_cost: route.output_token_cost,
            },
        );
        return ContextPatch {
            stream_rx: Some(wrapped),
            ..Default::default()
        };
    }

    let Some(usage) = ctx.usage else {
        return ContextPatch::default();
    };

    let cost = usage.cost_usd(route.input_token_cost, route.output_token_cost);
    if !p.settled.try_claim(ctx.request_id) {
        info!(request_id = %ctx.request_id, "billing already settled, skipping");
        return ContextPatch::default();
    }
    match p.store.settle(tenant_id, api_key_id, cost).await {
        Ok(()) => ContextPatch::default(),
        Err(e) => ContextPatch::error(e),
    }
}

/// Store the response for future semantic hits. Only uncached, successful
/// text responses are stored; failures are non-fatal.
pub(crate) async fn cache_store(p: &Pipeline, ctx: &RequestContext) -> ContextPatch {
    if ctx.error.is_some() || ctx.is_cached {
        return ContextPatch::default();
    }
    let (Some(cache), Some(prompt), Some(content)) = (
        p.cache.as_ref(),
        last_message_content(&ctx.messages),
        ctx.response_content.as_deref(),
    ) else {
        return ContextPatch::default();
    };

    if let Err(e) = cache.store(prompt, content).await {
        warn!(request_id = %ctx.request_id, error = %e, "cache store failed");
    }
    ContextPatch::default()
}

/// Compute latency and assemble the telemetry rows. Runs for errored
/// requests too, as long as identity is known; the caller dispatches the
/// actual writes off the request path. Streamed token counts are zero here —
/// the stream-billing release path patches them in afterwards.
pub(crate) fn log(ctx: &RequestContext) -> ContextPatch {
    let latency_ms = ctx
        .started_at
        .map(|t| t.elapsed().as_millis() as i32)
        .unwrap_or(0);
    let mut patch = ContextPatch {
        latency_ms: Some(latency_ms),
        ..Default::default()
    };

    if ctx.error.as_ref().is_some_and(|e| !e.is_logged()) {
        return patch;
    }
    let (Some(user_id), Some(api_key_id)) = (ctx.user_id, ctx.api_key_id) else {
        return patch;
    };

    let usage = ctx.usage.unwrap_or_default();
    let cost = match (&ctx.route, ctx.is_cached) {
        (Some(route), false) => usage.cost_usd(route.input_token_cost, route.output_token_cost),
        _ => 0.0,
    };
    let status_code = ctx.error.as_ref().map(|e| e.status_code()).unwrap_or(200) as i16;

    patch.pending_log = Some(NewRequestLog {
        request_id: ctx.request_id,
        user_id,
        tenant_id: ctx.tenant_id,
        api_key_id,
        model_slug: ctx.model_slug.clone(),
        provider_name: ctx.route.as_ref().map(|r| r.provider_name.clone()),
        prompt_tokens: usage.prompt_tokens as i32,
        completion_tokens: usage.completion_tokens as i32,
        cost,
        latency_ms,
        status_code,
        cached: ctx.is_cached,
    });

    // A pair is only worth keeping when both branches actually completed.
    if ctx.error.is_none()
        && ctx.shadow_model.as_deref() != Some("error")
        && let (Some(shadow_model), Some(shadow_response), Some(primary_response)) = (
            ctx.shadow_model.as_ref(),
            ctx.shadow_response.as_ref(),
            ctx.response_content.as_ref(),
        )
    {
        patch.pending_evaluation = Some(NewEvaluationPair {
            user_id,
            prompt: last_message_content(&ctx.messages).unwrap_or_default().to_string(),
            primary_model: ctx.model_slug.clone(),
            primary_response: primary_response.clone(),
            shadow_model: shadow_model.clone(),
            shadow_response: shadow_response.clone(),
        });
    }

    patch
}
