use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use himmi_db::GatewayStore;

/// Settlement never runs twice for one request. The stream-billing release
/// path and any retry of it race through here; the loser logs and skips.
#[derive(Default)]
pub struct SettledRegistry {
    seen: Mutex<HashSet<Uuid>>,
}

/// Cap on remembered request ids; the set is cleared wholesale beyond it.
const REGISTRY_CAP: usize = 65_536;

impl SettledRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per request id.
    pub fn try_claim(&self, request_id: Uuid) -> bool {
        let mut seen = self.seen.lock();
        if seen.len() >= REGISTRY_CAP {
            seen.clear();
        }
        seen.insert(request_id)
    }
}

/// Deduct `cost` from the tenant and charge the key, exactly once per
/// request. Returns whether this call performed the settlement.
pub(crate) async fn settle_once(
    store: &Arc<dyn GatewayStore>,
    registry: &SettledRegistry,
    request_id: Uuid,
    tenant_id: i64,
    api_key_id: i64,
    cost: f64,
) -> bool {
    if !registry.try_claim(request_id) {
        info!(%request_id, "billing already settled, skipping");
        return false;
    }
    if let Err(e) = store.settle(tenant_id, api_key_id, cost).await {
        warn!(%request_id, tenant_id, error = %e, "billing settlement failed");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exactly_once() {
        let registry = SettledRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.try_claim(id));
        assert!(!registry.try_claim(id));
        assert!(registry.try_claim(Uuid::new_v4()));
    }
}
