//! In-process cache implementation, used by tests and single-node setups.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::embedding::{Embedder, HashEmbedder};
use crate::{SemanticCache, cosine_similarity};

struct Entry {
    embedding: Vec<f32>,
    response: String,
}

pub struct MemoryCache {
    embedder: Arc<dyn Embedder>,
    entries: Mutex<Vec<Entry>>,
    distance_threshold: f32,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(distance_threshold: f32, max_entries: usize) -> Self {
        Self {
            embedder: Arc::new(HashEmbedder::default()),
            entries: Mutex::new(Vec::new()),
            distance_threshold,
            max_entries,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SemanticCache for MemoryCache {
    async fn lookup(&self, prompt: &str) -> himmi_core::Result<Option<String>> {
        let query = self.embedder.embed(prompt).await?;
        let entries = self.entries.lock();

        let best = entries
            .iter()
            .map(|e| (cosine_similarity(&query, &e.embedding), e))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        Ok(best
            .filter(|(similarity, _)| 1.0 - similarity <= self.distance_threshold)
            .map(|(_, e)| e.response.clone()))
    }

    async fn store(&self, prompt: &str, response: &str) -> himmi_core::Result<()> {
        let embedding = self.embedder.embed(prompt).await?;
        let mut entries = self.entries.lock();
        entries.push(Entry {
            embedding,
            response: response.to_string(),
        });
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_lookup_hit() {
        let cache = MemoryCache::new(0.04, 16);
        cache.store("what is rust?", "A systems language.").await.unwrap();

        let hit = cache.lookup("what is rust?").await.unwrap();
        assert_eq!(hit.as_deref(), Some("A systems language."));
    }

    #[tokio::test]
    async fn test_unrelated_prompt_misses() {
        let cache = MemoryCache::new(0.04, 16);
        cache.store("what is rust?", "A systems language.").await.unwrap();

        let miss = cache.lookup("recipe for pancakes with maple syrup").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_empty_cache_misses() {
        let cache = MemoryCache::new(0.04, 16);
        assert!(cache.lookup("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_keeps_newest() {
        let cache = MemoryCache::new(0.04, 2);
        cache.store("alpha one", "1").await.unwrap();
        cache.store("beta two", "2").await.unwrap();
        cache.store("gamma three", "3").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("alpha one").await.unwrap().is_none());
        assert_eq!(cache.lookup("gamma three").await.unwrap().as_deref(), Some("3"));
    }
}
