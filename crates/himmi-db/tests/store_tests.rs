//! Data-layer contract tests, run against the in-memory store.

use std::sync::Arc;
use uuid::Uuid;

use himmi_db::keys::hash_api_key;
use himmi_db::{GatewayStore, MemStore, NewRequestLog};

fn seeded_store(credits: f64) -> (Arc<MemStore>, i64, i64, i64, String) {
    let store = Arc::new(MemStore::new());
    let tenant_id = store.add_tenant(credits);
    let user_id = store.add_user(Some(tenant_id));
    let raw_key = "sk-or-v1-testkey123".to_string();
    let api_key_id = store.add_api_key(user_id, &hash_api_key(&raw_key));
    (store, tenant_id, user_id, api_key_id, raw_key)
}

fn log_row(request_id: Uuid, user_id: i64, tenant_id: i64, api_key_id: i64) -> NewRequestLog {
    NewRequestLog {
        request_id,
        user_id,
        tenant_id: Some(tenant_id),
        api_key_id,
        model_slug: "openai/gpt-4o".into(),
        provider_name: Some("OpenAI".into()),
        prompt_tokens: 0,
        completion_tokens: 0,
        cost: 0.0,
        latency_ms: 12,
        status_code: 200,
        cached: false,
    }
}

// ── Authentication ─────────────────────────────────────────────

#[tokio::test]
async fn test_authenticate_resolves_identity() {
    let (store, tenant_id, user_id, api_key_id, raw_key) = seeded_store(10.0);

    let auth = store
        .authenticate(&hash_api_key(&raw_key))
        .await
        .unwrap()
        .expect("active key should authenticate");
    assert_eq!(auth.user_id, user_id);
    assert_eq!(auth.api_key_id, api_key_id);
    assert_eq!(auth.tenant_id, Some(tenant_id));
    assert_eq!(auth.tenant_credits, Some(10.0));
}

#[tokio::test]
async fn test_authenticate_unknown_hash_misses() {
    let (store, ..) = seeded_store(10.0);
    let auth = store
        .authenticate(&hash_api_key("sk-or-v1-bogus"))
        .await
        .unwrap();
    assert!(auth.is_none());
}

#[tokio::test]
async fn test_authenticate_disabled_key_misses() {
    let (store, _, _, api_key_id, raw_key) = seeded_store(10.0);
    store.disable_api_key(api_key_id);
    let auth = store.authenticate(&hash_api_key(&raw_key)).await.unwrap();
    assert!(auth.is_none());
}

#[tokio::test]
async fn test_authenticate_user_without_tenant() {
    let store = MemStore::new();
    let user_id = store.add_user(None);
    let raw_key = "sk-or-v1-orphan";
    store.add_api_key(user_id, &hash_api_key(raw_key));

    let auth = store
        .authenticate(&hash_api_key(raw_key))
        .await
        .unwrap()
        .unwrap();
    assert!(auth.tenant_id.is_none());
    assert!(auth.tenant_credits.is_none());
}

// ── Routing ────────────────────────────────────────────────────

#[tokio::test]
async fn test_resolve_model_picks_cheapest_mapping() {
    let store = MemStore::new();
    store.add_route("llama-70b", "Groq", 0.59, 0.79);
    store.add_route("llama-70b", "OpenAI", 2.50, 10.00);

    let target = store.resolve_model("llama-70b").await.unwrap().unwrap();
    assert_eq!(target.provider_name, "Groq");
    assert_eq!(target.input_token_cost, 0.59);
}

#[tokio::test]
async fn test_next_cheapest_excludes_failed_mapping() {
    let store = MemStore::new();
    let cheap = store.add_route("llama-70b", "Groq", 0.59, 0.79);
    store.add_route("llama-70b", "Mistral AI", 2.00, 6.00);

    let next = store
        .next_cheapest_mapping("llama-70b", cheap)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.provider_name, "Mistral AI");

    assert!(
        store
            .next_cheapest_mapping("llama-70b", next.mapping_id)
            .await
            .unwrap()
            .map(|t| t.mapping_id)
            != Some(next.mapping_id)
    );
}

#[tokio::test]
async fn test_unknown_slug_has_no_route() {
    let store = MemStore::new();
    assert!(store.resolve_model("no-such-model").await.unwrap().is_none());
}

// ── Settlement ─────────────────────────────────────────────────

#[tokio::test]
async fn test_settle_moves_exact_amount() {
    let (store, tenant_id, _, api_key_id, _) = seeded_store(1.0);

    store.settle(tenant_id, api_key_id, 0.00875).await.unwrap();

    let credits = store.tenant_credits(tenant_id).unwrap();
    assert!((credits - 0.99125).abs() < 1e-12);
    let consumed = store.credits_consumed(api_key_id).unwrap();
    assert!((consumed - 0.00875).abs() < 1e-12);
    assert!(store.last_used(api_key_id).is_some());
}

#[tokio::test]
async fn test_settle_to_exactly_zero_is_allowed() {
    let (store, tenant_id, _, api_key_id, _) = seeded_store(0.5);
    store.settle(tenant_id, api_key_id, 0.5).await.unwrap();
    assert_eq!(store.tenant_credits(tenant_id).unwrap(), 0.0);
}

#[tokio::test]
async fn test_concurrent_settlements_lose_nothing() {
    let (store, tenant_id, _, api_key_id, _) = seeded_store(100.0);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.settle(tenant_id, api_key_id, 0.25).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let credits = store.tenant_credits(tenant_id).unwrap();
    assert!((credits - (100.0 - 50.0 * 0.25)).abs() < 1e-9);
    let consumed = store.credits_consumed(api_key_id).unwrap();
    assert!((consumed - 12.5).abs() < 1e-9);
}

// ── Request log ────────────────────────────────────────────────

#[tokio::test]
async fn test_request_log_usage_update() {
    let (store, tenant_id, user_id, api_key_id, _) = seeded_store(10.0);
    let request_id = Uuid::new_v4();

    store
        .insert_request_log(log_row(request_id, user_id, tenant_id, api_key_id))
        .await
        .unwrap();
    store
        .update_request_log_usage(request_id, 10, 20, 0.00035)
        .await
        .unwrap();

    let logs = store.request_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].prompt_tokens, 10);
    assert_eq!(logs[0].completion_tokens, 20);
    assert!((logs[0].cost - 0.00035).abs() < 1e-12);
}

#[tokio::test]
async fn test_usage_update_for_unknown_request_is_a_noop() {
    let store = MemStore::new();
    store
        .update_request_log_usage(Uuid::new_v4(), 1, 1, 0.1)
        .await
        .unwrap();
    assert!(store.request_logs().is_empty());
}

// ── Credentials ────────────────────────────────────────────────

#[tokio::test]
async fn test_provider_credential_lookup() {
    let (store, _, user_id, _, _) = seeded_store(10.0);
    store.set_credential(user_id, "gemini", "ciphertext-blob");

    assert_eq!(
        store.provider_credential(user_id, "gemini").await.unwrap(),
        Some("ciphertext-blob".to_string())
    );
    assert!(
        store
            .provider_credential(user_id, "openai")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_credential_upsert_replaces() {
    let (store, _, user_id, _, _) = seeded_store(10.0);
    store.set_credential(user_id, "openai", "old");
    store.set_credential(user_id, "openai", "new");
    assert_eq!(
        store.provider_credential(user_id, "openai").await.unwrap(),
        Some("new".to_string())
    );
}
