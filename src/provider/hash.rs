//! FNV-1a feature-hashing embedder.
//!
//! Deterministic, dependency-free stand-in for the remote embedding model.
//! Tokens are hashed into a fixed number of buckets and the resulting
//! vector is L2-normalized, so cosine similarity degrades gracefully into
//! token overlap. Used in tests and as an offline fallback; not a semantic
//! model.

use crate::error::ProviderError;
use crate::provider::EmbeddingProvider;

/// Default output dimension. Vectors from different embedders live in
/// different spaces; the search path skips candidates whose stored vector
/// dimension does not match the query's.
pub const HASH_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Feature-hashing embedder over lowercase alphanumeric tokens.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vec = vec![0.0_f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token);
            let bucket = (h % self.dimension as u64) as usize;
            // Second hash bit decides sign, spreading collisions.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        Ok(vec)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        "fnv1a-hash"
    }
}
