//! The stream-billing wrapper.
//!
//! Forwards upstream chunks to the client untouched while watching for the
//! `usage` field some providers attach only to the terminal chunk. Whatever
//! ends the forwarding loop — upstream exhaustion, upstream error, or the
//! client dropping the receiver — the release path runs exactly once:
//! settle the delivered tokens and patch the request-log row.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::billing::{SettledRegistry, settle_once};
use himmi_core::Usage;
use himmi_db::GatewayStore;
use himmi_upstream::ChatChunk;

/// Everything the release path needs, captured by value before streaming
/// begins.
pub(crate) struct StreamBilling {
    pub store: Arc<dyn GatewayStore>,
    pub registry: Arc<SettledRegistry>,
    pub request_id: Uuid,
    pub tenant_id: i64,
    pub api_key_id: i64,
    pub input_token_cost: f64,
    pub output_token_cost: f64,
}

impl StreamBilling {
    async fn release(self, usage: Usage) {
        if usage.is_zero() {
            return;
        }
        let cost = usage.cost_usd(self.input_token_cost, self.output_token_cost);
        let settled = settle_once(
            &self.store,
            &self.registry,
            self.request_id,
            self.tenant_id,
            self.api_key_id,
            cost,
        )
        .await;
        if !settled {
            return;
        }
        if let Err(e) = self
            .store
            .update_request_log_usage(
                self.request_id,
                usage.prompt_tokens as i32,
                usage.completion_tokens as i32,
                cost,
            )
            .await
        {
            warn!(request_id = %self.request_id, error = %e, "request log usage update failed");
        }
    }
}

/// Wrap an upstream chunk channel. The returned receiver is what the HTTP
/// surface drives; the forwarding task owns the upstream receiver and the
/// release path.
pub(crate) fn wrap(
    mut upstream_rx: mpsc::Receiver<ChatChunk>,
    billing: StreamBilling,
) -> mpsc::Receiver<ChatChunk> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut usage = Usage::zero();
        loop {
            tokio::select! {
                chunk = upstream_rx.recv() => {
                    match chunk {
                        Some(chunk) => {
                            if let Some(u) = chunk.usage {
                                usage = u;
                            }
                            if tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                // Client disconnected; stop reading so the upstream call is
                // cancelled cooperatively.
                _ = tx.closed() => break,
            }
        }
        drop(upstream_rx);
        billing.release(usage).await;
    });

    rx
}
