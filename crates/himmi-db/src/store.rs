use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AuthRecord, NewEvaluationPair, NewRequestLog, RouteTarget};
use himmi_core::Result;

/// Data-layer contract consumed by the request pipeline.
///
/// Implementations: [`crate::PgStore`] (PostgreSQL, production) and
/// [`crate::MemStore`] (in-process, tests and simulator-only deployments).
/// Every method is a suspension point; no implementation may hold a
/// transaction across calls.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Look up an active API key by its SHA-256 hex hash, eagerly resolving
    /// the owning user and tenant. Returns None when no active row matches.
    async fn authenticate(&self, key_hash: &str) -> Result<Option<AuthRecord>>;

    /// Resolve a model slug to its cheapest mapping (by input cost).
    async fn resolve_model(&self, slug: &str) -> Result<Option<RouteTarget>>;

    /// The next-cheapest mapping for a slug, excluding a failed one.
    /// Fallback routing only.
    async fn next_cheapest_mapping(
        &self,
        slug: &str,
        exclude_mapping_id: i64,
    ) -> Result<Option<RouteTarget>>;

    /// Ciphertext of the user's own upstream key for a canonical provider
    /// family, if they brought one.
    async fn provider_credential(
        &self,
        user_id: i64,
        canonical_provider: &str,
    ) -> Result<Option<String>>;

    /// Atomically deduct `cost` USD from the tenant balance and add it to the
    /// key's consumption counter, stamping `last_used`. One transaction, row
    /// locks acquired tenant first, then key — never the other way around.
    async fn settle(&self, tenant_id: i64, api_key_id: i64, cost: f64) -> Result<()>;

    /// Append a request-log row.
    async fn insert_request_log(&self, row: NewRequestLog) -> Result<()>;

    /// Patch token counts and cost onto an existing request-log row once a
    /// stream has settled.
    async fn update_request_log_usage(
        &self,
        request_id: Uuid,
        prompt_tokens: i32,
        completion_tokens: i32,
        cost: f64,
    ) -> Result<()>;

    /// Record a shadow-mode comparison.
    async fn insert_evaluation_pair(&self, row: NewEvaluationPair) -> Result<()>;
}
