use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Trait for turning a prompt into a fixed-dimension vector. The cache only
/// ever compares vectors from the same embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> himmi_core::Result<Vec<f32>>;

    /// Dimensionality of the output vectors.
    fn dimensions(&self) -> usize;
}

/// Deterministic local embedder using hashed bag-of-words features.
///
/// Each lowercased token is hashed into one of `dims` buckets with a ±1 sign,
/// and the result is L2-normalized. Near-identical prompts land near each
/// other; unrelated prompts score near zero. No model download, no network —
/// a real sentence-embedding model can replace this behind the same trait.
pub struct HashEmbedder {
    dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> himmi_core::Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosine_similarity;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed("what is the capital of France?").await.unwrap();
        let b = e.embed("what is the capital of France?").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), e.dimensions());
    }

    #[tokio::test]
    async fn test_identical_prompts_have_unit_similarity() {
        let e = HashEmbedder::default();
        let a = e.embed("hello world").await.unwrap();
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_case_and_punctuation_are_ignored() {
        let e = HashEmbedder::default();
        let a = e.embed("What is Rust?").await.unwrap();
        let b = e.embed("what is rust").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unrelated_prompts_are_distant() {
        let e = HashEmbedder::default();
        let a = e.embed("quantum entanglement decoherence photon").await.unwrap();
        let b = e.embed("bake sourdough bread overnight starter").await.unwrap();
        assert!(cosine_similarity(&a, &b) < 0.5);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_zero_vector() {
        let e = HashEmbedder::default();
        let v = e.embed("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
