use crate::chunking::ChunkingConfig;
use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of most recent turns the query rewriter sees. Older turns are dropped.
pub const DEFAULT_HISTORY_WINDOW: usize = 4;

/// Minimum cosine similarity a passage needs to be used as context.
pub const DEFAULT_MIN_RELEVANCE_SCORE: f32 = 0.3;

pub const DEFAULT_TOP_K: usize = 4;

/// Upper bound on the characters of retrieved context placed in one prompt.
pub const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 6_000;

pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub min_score: f32,
    pub history_window: usize,
    pub context_budget_chars: usize,
    pub service_timeout_secs: u64,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_RELEVANCE_SCORE,
            history_window: DEFAULT_HISTORY_WINDOW,
            context_budget_chars: DEFAULT_CONTEXT_BUDGET_CHARS,
            service_timeout_secs: DEFAULT_SERVICE_TIMEOUT_SECS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            embed_concurrency: DEFAULT_EMBED_CONCURRENCY,
        }
    }
}

impl RagConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;

        if self.top_k == 0 {
            return Err(IngestError::InvalidArgument("top_k must be at least 1".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(IngestError::InvalidArgument(format!(
                "min_score {} is outside the cosine range [-1, 1]",
                self.min_score
            )));
        }
        if self.context_budget_chars == 0 {
            return Err(IngestError::InvalidArgument(
                "context_budget_chars must be positive".to_string(),
            ));
        }
        if self.service_timeout_secs == 0 {
            return Err(IngestError::InvalidArgument(
                "service_timeout_secs must be positive".to_string(),
            ));
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return Err(IngestError::InvalidArgument(
                "embedding batch size and concurrency must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config: RagConfig = serde_json::from_str(r#"{"top_k": 2, "min_score": 0.5}"#)?;
        assert_eq!(config.top_k, 2);
        assert_eq!(config.history_window, DEFAULT_HISTORY_WINDOW);
        assert_eq!(config.chunking, ChunkingConfig::default());
        Ok(())
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = RagConfig {
            min_score: 1.5,
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
