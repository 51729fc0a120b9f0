//! In-memory implementation of [`GatewayStore`].
//!
//! Backs tests and simulator-only deployments that run without PostgreSQL.
//! The single mutex makes every settlement trivially atomic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{AuthRecord, NewEvaluationPair, NewRequestLog, RouteTarget};
use crate::store::GatewayStore;
use himmi_core::{GatewayError, Result};

#[derive(Debug, Clone)]
struct TenantRow {
    credits: f64,
}

#[derive(Debug, Clone)]
struct UserRow {
    tenant_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ApiKeyRow {
    user_id: i64,
    key_hash: String,
    disabled: bool,
    deleted: bool,
    credits_consumed: f64,
    last_used: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
struct MappingRow {
    mapping_id: i64,
    provider_name: String,
    input_token_cost: f64,
    output_token_cost: f64,
}

#[derive(Default)]
struct Inner {
    tenants: HashMap<i64, TenantRow>,
    users: HashMap<i64, UserRow>,
    api_keys: HashMap<i64, ApiKeyRow>,
    /// (user_id, canonical provider) -> ciphertext
    credentials: HashMap<(i64, String), String>,
    /// slug -> mappings ordered by ascending input cost
    routes: HashMap<String, Vec<MappingRow>>,
    request_logs: Vec<NewRequestLog>,
    evaluation_pairs: Vec<NewEvaluationPair>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemStore {
    inner: Mutex<Inner>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    // ── Seeding ────────────────────────────────────────────────

    pub fn add_tenant(&self, credits: f64) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.tenants.insert(id, TenantRow { credits });
        id
    }

    pub fn add_user(&self, tenant_id: Option<i64>) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.users.insert(id, UserRow { tenant_id });
        id
    }

    pub fn add_api_key(&self, user_id: i64, key_hash: &str) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.api_keys.insert(
            id,
            ApiKeyRow {
                user_id,
                key_hash: key_hash.to_string(),
                disabled: false,
                deleted: false,
                credits_consumed: 0.0,
                last_used: None,
            },
        );
        id
    }

    pub fn disable_api_key(&self, api_key_id: i64) {
        if let Some(k) = self.inner.lock().api_keys.get_mut(&api_key_id) {
            k.disabled = true;
        }
    }

    /// Register a priced mapping for a slug. Returns the mapping id.
    pub fn add_route(
        &self,
        slug: &str,
        provider_name: &str,
        input_token_cost: f64,
        output_token_cost: f64,
    ) -> i64 {
        let mut inner = self.inner.lock();
        let mapping_id = inner.next_id();
        let entry = inner.routes.entry(slug.to_string()).or_default();
        entry.push(MappingRow {
            mapping_id,
            provider_name: provider_name.to_string(),
            input_token_cost,
            output_token_cost,
        });
        entry.sort_by(|a, b| a.input_token_cost.total_cmp(&b.input_token_cost));
        mapping_id
    }

    pub fn set_credential(&self, user_id: i64, canonical_provider: &str, ciphertext: &str) {
        self.inner.lock().credentials.insert(
            (user_id, canonical_provider.to_string()),
            ciphertext.to_string(),
        );
    }

    // ── Test inspection ────────────────────────────────────────

    pub fn tenant_credits(&self, tenant_id: i64) -> Option<f64> {
        self.inner.lock().tenants.get(&tenant_id).map(|t| t.credits)
    }

    pub fn credits_consumed(&self, api_key_id: i64) -> Option<f64> {
        self.inner
            .lock()
            .api_keys
            .get(&api_key_id)
            .map(|k| k.credits_consumed)
    }

    pub fn last_used(&self, api_key_id: i64) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner
            .lock()
            .api_keys
            .get(&api_key_id)
            .and_then(|k| k.last_used)
    }

    pub fn request_logs(&self) -> Vec<NewRequestLog> {
        self.inner.lock().request_logs.clone()
    }

    pub fn evaluation_pairs(&self) -> Vec<NewEvaluationPair> {
        self.inner.lock().evaluation_pairs.clone()
    }
}

#[async_trait]
impl GatewayStore for MemStore {
    async fn authenticate(&self, key_hash: &str) -> Result<Option<AuthRecord>> {
        let inner = self.inner.lock();
        let found = inner
            .api_keys
            .iter()
            .find(|(_, k)| k.key_hash == key_hash && !k.disabled && !k.deleted);

        let Some((key_id, key)) = found else {
            return Ok(None);
        };
        let Some(user) = inner.users.get(&key.user_id) else {
            return Ok(None);
        };
        let tenant_credits = user
            .tenant_id
            .and_then(|tid| inner.tenants.get(&tid))
            .map(|t| t.credits);

        Ok(Some(AuthRecord {
            user_id: key.user_id,
            api_key_id: *key_id,
            tenant_id: user.tenant_id,
            tenant_credits,
        }))
    }

    async fn resolve_model(&self, slug: &str) -> Result<Option<RouteTarget>> {
        let inner = self.inner.lock();
        Ok(inner
            .routes
            .get(slug)
            .and_then(|mappings| mappings.first())
            .map(|m| RouteTarget {
                mapping_id: m.mapping_id,
                provider_name: m.provider_name.clone(),
                input_token_cost: m.input_token_cost,
                output_token_cost: m.output_token_cost,
            }))
    }

    async fn next_cheapest_mapping(
        &self,
        slug: &str,
        exclude_mapping_id: i64,
    ) -> Result<Option<RouteTarget>> {
        let inner = self.inner.lock();
        Ok(inner
            .routes
            .get(slug)
            .and_then(|mappings| {
                mappings
                    .iter()
                    .find(|m| m.mapping_id != exclude_mapping_id)
            })
            .map(|m| RouteTarget {
                mapping_id: m.mapping_id,
                provider_name: m.provider_name.clone(),
                input_token_cost: m.input_token_cost,
                output_token_cost: m.output_token_cost,
            }))
    }

    async fn provider_credential(
        &self,
        user_id: i64,
        canonical_provider: &str,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .credentials
            .get(&(user_id, canonical_provider.to_string()))
            .cloned())
    }

    async fn settle(&self, tenant_id: i64, api_key_id: i64, cost: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        let tenant = inner
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| GatewayError::Database(format!("no tenant {tenant_id}")))?;
        tenant.credits -= cost;

        let key = inner
            .api_keys
            .get_mut(&api_key_id)
            .ok_or_else(|| GatewayError::Database(format!("no api key {api_key_id}")))?;
        key.credits_consumed += cost;
        key.last_used = Some(chrono::Utc::now());
        Ok(())
    }

    async fn insert_request_log(&self, row: NewRequestLog) -> Result<()> {
        self.inner.lock().request_logs.push(row);
        Ok(())
    }

    async fn update_request_log_usage(
        &self,
        request_id: Uuid,
        prompt_tokens: i32,
        completion_tokens: i32,
        cost: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner
            .request_logs
            .iter_mut()
            .find(|r| r.request_id == request_id)
        {
            row.prompt_tokens = prompt_tokens;
            row.completion_tokens = completion_tokens;
            row.cost = cost;
        }
        Ok(())
    }

    async fn insert_evaluation_pair(&self, row: NewEvaluationPair) -> Result<()> {
        self.inner.lock().evaluation_pairs.push(row);
        Ok(())
    }
}
