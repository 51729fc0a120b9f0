//! Redis-backed semantic cache.
//!
//! Entries live in a single hash keyed by the configured index name, with a
//! companion list tracking insertion order for eviction. Lookups fetch the
//! whole (bounded) entry set and score similarity locally; the cache is
//! intentionally coarse and small.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// `::redis` — this module shadows the crate name.
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;

use crate::embedding::{Embedder, HashEmbedder};
use crate::{SemanticCache, cosine_similarity};

use himmi_core::{GatewayError, Result};

fn cache_err(e: ::redis::RedisError) -> GatewayError {
    GatewayError::Cache(e.to_string())
}

#[derive(Serialize, Deserialize)]
struct Entry {
    prompt: String,
    response: String,
    embedding: Vec<f32>,
}

pub struct RedisSemanticCache {
    conn: ConnectionManager,
    embedder: Arc<dyn Embedder>,
    index: String,
    distance_threshold: f32,
    max_entries: usize,
}

impl RedisSemanticCache {
    /// Connect to Redis. Errors here mean the cache stays disabled; callers
    /// degrade to permanent misses rather than failing startup.
    pub async fn connect(
        url: &str,
        index: &str,
        distance_threshold: f32,
        max_entries: usize,
    ) -> Result<Self> {
        let client = ::redis::Client::open(url).map_err(cache_err)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_err)?;
        info!(index, distance_threshold, "semantic cache connected");
        Ok(Self {
            conn,
            embedder: Arc::new(HashEmbedder::default()),
            index: index.to_string(),
            distance_threshold,
            max_entries,
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    fn entries_key(&self) -> String {
        format!("{}:entries", self.index)
    }

    fn order_key(&self) -> String {
        format!("{}:ids", self.index)
    }
}

#[async_trait]
impl SemanticCache for RedisSemanticCache {
    async fn lookup(&self, prompt: &str) -> Result<Option<String>> {
        let query = self.embedder.embed(prompt).await?;

        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> =
            conn.hgetall(self.entries_key()).await.map_err(cache_err)?;

        let mut best: Option<(f32, String)> = None;
        for blob in raw.values() {
            let Ok(entry) = serde_json::from_str::<Entry>(blob) else {
                continue;
            };
            let similarity = cosine_similarity(&query, &entry.embedding);
            if best.as_ref().is_none_or(|(s, _)| similarity > *s) {
                best = Some((similarity, entry.response));
            }
        }

        Ok(best
            .filter(|(similarity, _)| 1.0 - similarity <= self.distance_threshold)
            .map(|(_, response)| response))
    }

    async fn store(&self, prompt: &str, response: &str) -> Result<()> {
        let embedding = self.embedder.embed(prompt).await?;
        let entry = Entry {
            prompt: prompt.to_string(),
            response: response.to_string(),
            embedding,
        };
        let blob = serde_json::to_string(&entry)?;
        let id = Uuid::new_v4().to_string();

        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.entries_key(), &id, blob)
            .await
            .map_err(cache_err)?;
        let _: () = conn
            .lpush(self.order_key(), &id)
            .await
            .map_err(cache_err)?;

        // Evict the oldest entries beyond the cap.
        let len: usize = conn.llen(self.order_key()).await.map_err(cache_err)?;
        if len > self.max_entries {
            for _ in self.max_entries..len {
                let evicted: Option<String> =
                    conn.rpop(self.order_key(), None).await.map_err(cache_err)?;
                if let Some(evicted) = evicted {
                    let _: () = conn
                        .hdel(self.entries_key(), evicted)
                        .await
                        .map_err(cache_err)?;
                }
            }
        }

        Ok(())
    }
}
