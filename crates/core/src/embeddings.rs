use crate::error::ServiceError;
use crate::traits::Embedder;
use async_trait::async_trait;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Deterministic, offline embedder built from hashed character trigrams.
///
/// Text is lowercased, punctuation is folded into spaces, and each trigram of
/// the space-padded result increments one FNV-1a bucket. The vector is
/// L2-normalized, so cosine similarity measures trigram overlap.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    name: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let folded = text
            .to_lowercase()
            .chars()
            .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
            .collect::<String>();
        let words = folded.split_whitespace().collect::<Vec<_>>();

        if words.is_empty() {
            return vector;
        }

        let padded = format!(" {} ", words.join(" "));
        let chars: Vec<char> = padded.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
