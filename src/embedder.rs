use crate::error::{Error, Result};

/// Text embedding backend used by semantic query expansion.
///
/// Implementations must accept batches of one to a few hundred texts and
/// return one vector of [`Embedder::dimension`] floats per input, in order.
/// A failed call must leave the implementation usable.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

pub const DEFAULT_HASH_DIMENSION: usize = 256;

/// Deterministic feature-hashing embedder.
///
/// Each lower-cased word and each of its character trigrams is hashed into
/// one signed bucket; the result is L2-normalized. Lexically close terms
/// share trigram buckets, which is enough to exercise the semantic path
/// without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Embedder(
                "hash embedder dimension must be positive".into(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let mut words: Vec<&str> = lowered.split_whitespace().collect();
        if words.is_empty() {
            words.push("_");
        }

        for word in words {
            self.add_feature(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> =
                format!("^{word}$").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), 0.5);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
