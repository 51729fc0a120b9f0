//! Row types flowing between the store and the pipeline.
//!
//! The persistent schema itself lives in `migrations/`; this module only
//! materializes what the request path reads and writes. Tenants own the
//! credit balance, users belong to one tenant, keys are denormalized onto
//! both, and the catalog maps client-facing slugs to priced provider edges.

use uuid::Uuid;

/// Resolved identity for an authenticated request: the active ApiKey row
/// joined eagerly to its user and tenant.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub user_id: i64,
    pub api_key_id: i64,
    /// None when the user row has no tenant — a data-integrity error the
    /// auth stage surfaces.
    pub tenant_id: Option<i64>,
    pub tenant_credits: Option<f64>,
}

/// One priced routing choice for a slug. Costs are USD per 1M tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub mapping_id: i64,
    /// Catalog display name, e.g. "Google AI". Canonicalized at call time.
    pub provider_name: String,
    pub input_token_cost: f64,
    pub output_token_cost: f64,
}

/// Append-only request telemetry. For streamed responses the token counts
/// and cost are written as zero here and updated by the stream-billing
/// release path keyed on `request_id`.
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub request_id: Uuid,
    pub user_id: i64,
    pub tenant_id: Option<i64>,
    pub api_key_id: i64,
    pub model_slug: String,
    pub provider_name: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub cost: f64,
    pub latency_ms: i32,
    pub status_code: i16,
    pub cached: bool,
}

/// Shadow-mode output: a prompt answered by two models, for offline
/// comparison.
#[derive(Debug, Clone)]
pub struct NewEvaluationPair {
    pub user_id: i64,
    pub prompt: String,
    pub primary_model: String,
    pub primary_response: String,
    pub shadow_model: String,
    pub shadow_response: String,
}
