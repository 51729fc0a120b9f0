use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::models::{AuthRecord, NewEvaluationPair, NewRequestLog, RouteTarget};
use crate::store::GatewayStore;
use himmi_core::{GatewayError, Result};

fn db_err(e: sqlx::Error) -> GatewayError {
    GatewayError::Database(e.to_string())
}

/// PostgreSQL-backed store. Holds the process-wide bounded connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        info!(max_connections, "connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn authenticate(&self, key_hash: &str) -> Result<Option<AuthRecord>> {
        let row = sqlx::query(
            "SELECT ak.id AS api_key_id, ak.user_id, u.tenant_id, t.credits
             FROM api_keys ak
             JOIN users u ON u.id = ak.user_id
             LEFT JOIN tenants t ON t.id = u.tenant_id
             WHERE ak.key_hash = $1 AND ak.disabled = FALSE AND ak.deleted = FALSE",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| AuthRecord {
            user_id: r.get("user_id"),
            api_key_id: r.get("api_key_id"),
            tenant_id: r.get("tenant_id"),
            tenant_credits: r.get("credits"),
        }))
    }

    async fn resolve_model(&self, slug: &str) -> Result<Option<RouteTarget>> {
        let row = sqlx::query(
            "SELECT mpm.id AS mapping_id, p.name AS provider_name,
                    mpm.input_token_cost, mpm.output_token_cost
             FROM models m
             JOIN model_provider_mappings mpm ON mpm.model_id = m.id
             JOIN providers p ON p.id = mpm.provider_id
             WHERE m.slug = $1
             ORDER BY mpm.input_token_cost ASC
             LIMIT 1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(route_target_from_row))
    }

    async fn next_cheapest_mapping(
        &self,
        slug: &str,
        exclude_mapping_id: i64,
    ) -> Result<Option<RouteTarget>> {
        let row = sqlx::query(
            "SELECT mpm.id AS mapping_id, p.name AS provider_name,
                    mpm.input_token_cost, mpm.output_token_cost
             FROM models m
             JOIN model_provider_mappings mpm ON mpm.model_id = m.id
             JOIN providers p ON p.id = mpm.provider_id
             WHERE m.slug = $1 AND mpm.id <> $2
             ORDER BY mpm.input_token_cost ASC
             LIMIT 1",
        )
        .bind(slug)
        .bind(exclude_mapping_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(route_target_from_row))
    }

    async fn provider_credential(
        &self,
        user_id: i64,
        canonical_provider: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT encrypted_key FROM tenant_provider_credentials
             WHERE user_id = $1 AND provider_name = $2",
        )
        .bind(user_id)
        .bind(canonical_provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| r.get("encrypted_key")))
    }

    async fn settle(&self, tenant_id: i64, api_key_id: i64, cost: f64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock order is tenant before key, everywhere. Two keys of the same
        // tenant settling concurrently would deadlock otherwise.
        sqlx::query("SELECT credits FROM tenants WHERE id = $1 FOR UPDATE")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("UPDATE tenants SET credits = credits - $2 WHERE id = $1")
            .bind(tenant_id)
            .bind(cost)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("SELECT id FROM api_keys WHERE id = $1 FOR UPDATE")
            .bind(api_key_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "UPDATE api_keys
             SET credits_consumed = credits_consumed + $2, last_used = NOW()
             WHERE id = $1",
        )
        .bind(api_key_id)
        .bind(cost)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn insert_request_log(&self, row: NewRequestLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO request_logs
                (request_id, user_id, tenant_id, api_key_id, model_slug, provider_name,
                 prompt_tokens, completion_tokens, cost, latency_ms, status_code, cached)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(row.request_id)
        .bind(row.user_id)
        .bind(row.tenant_id)
        .bind(row.api_key_id)
        .bind(&row.model_slug)
        .bind(&row.provider_name)
        .bind(row.prompt_tokens)
        .bind(row.completion_tokens)
        .bind(row.cost)
        .bind(row.latency_ms)
        .bind(row.status_code)
        .bind(row.cached)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_request_log_usage(
        &self,
        request_id: Uuid,
        prompt_tokens: i32,
        completion_tokens: i32,
        cost: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE request_logs
             SET prompt_tokens = $2, completion_tokens = $3, cost = $4
             WHERE request_id = $1",
        )
        .bind(request_id)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .bind(cost)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_evaluation_pair(&self, row: NewEvaluationPair) -> Result<()> {
        sqlx::query(
            "INSERT INTO evaluation_pairs
                (user_id, prompt, primary_model, primary_response, shadow_model, shadow_response)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(row.user_id)
        .bind(&row.prompt)
        .bind(&row.primary_model)
        .bind(&row.primary_response)
        .bind(&row.shadow_model)
        .bind(&row.shadow_response)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn route_target_from_row(r: sqlx::postgres::PgRow) -> RouteTarget {
    RouteTarget {
        mapping_id: r.get("mapping_id"),
        provider_name: r.get("provider_name"),
        input_token_cost: r.get("input_token_cost"),
        output_token_cost: r.get("output_token_cost"),
    }
}
