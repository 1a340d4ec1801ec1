
use async_trait::async_trait;

use super::math::normalize;
use super::{Embedding, EmbeddingGenerator};
use crate::{RagError, Result};

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic, offline embedder.
///
/// Lower-cased alphanumeric words are hashed (FNV-1a) into a fixed number of
/// buckets and the resulting count vector is L2-normalised, so texts that share
/// vocabulary land close together in cosine space.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    #[inline]
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Validation(
                "Hashing embedder dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Synchronous core of the embedder
    #[inline]
    pub fn embed(&self, text: &str) -> Embedding {
        let mut buckets = vec![0.0_f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) % self.dimension as u64;
            buckets[bucket as usize] += 1.0;
        }

        normalize(&buckets)
    }
}

#[async_trait]
impl EmbeddingGenerator for HashingEmbedder {
    #[inline]
    async fn generate_embedding(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed(text))
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
