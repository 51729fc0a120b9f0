//! # himmi-cache
//!
//! Semantic response cache: maps a prompt fingerprint to a previously served
//! response by vector similarity. The production backend is Redis
//! ([`RedisSemanticCache`]); [`MemoryCache`] serves tests. The handle is
//! optional everywhere it is consumed — no cache means a permanent miss.

pub mod embedding;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

pub use embedding::{Embedder, HashEmbedder};
pub use memory::MemoryCache;
pub use self::redis::RedisSemanticCache;

/// Vector-similarity cache over (prompt, response) pairs.
///
/// Both operations are best-effort: callers treat errors as misses and must
/// never fail a request on them.
#[async_trait]
pub trait SemanticCache: Send + Sync {
    /// Return the stored response nearest to `prompt` if it is within the
    /// configured distance threshold.
    async fn lookup(&self, prompt: &str) -> himmi_core::Result<Option<String>>;

    /// Store a served response under its prompt fingerprint.
    async fn store(&self, prompt: &str, response: &str) -> himmi_core::Result<()>;
}

/// Cosine similarity between two vectors of equal dimension.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }
}
