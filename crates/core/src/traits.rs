use crate::error::{IndexError, ServiceError};
use crate::models::{IndexEntry, RetrievedChunk};
use crate::prompt::Prompt;
use async_trait::async_trait;

/// External text embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Identifier recorded in the persisted index.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// External text completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError>;
}

pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError>;
}
