use crate::conversation::Session;
use crate::error::QueryError;
use crate::models::RetrievedChunk;
use crate::rewriter::QueryRewriter;
use crate::services::with_timeout;
use crate::stores::FlatIndex;
use crate::traits::{Embedder, LanguageModel, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub rewritten_query: String,
    /// Highest relevance first; empty means nothing cleared the threshold.
    pub hits: Vec<RetrievedChunk>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Rewrite, embed, search and threshold, in that order.
pub struct Retriever<E, M, I = FlatIndex> {
    rewriter: QueryRewriter<M>,
    embedder: Arc<E>,
    index: Arc<I>,
    min_score: f32,
    timeout: Duration,
}

impl<E, M, I> Retriever<E, M, I>
where
    E: Embedder,
    M: LanguageModel,
    I: VectorIndex,
{
    pub fn new(
        rewriter: QueryRewriter<M>,
        embedder: Arc<E>,
        index: Arc<I>,
        min_score: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            rewriter,
            embedder,
            index,
            min_score,
            timeout,
        }
    }

    pub async fn retrieve(&self, session: &Session, utterance: &str, k: usize) -> Result<Retrieval, QueryError> {
        let history = session.history(self.rewriter.window());
        let rewritten_query = self.rewriter.rewrite(history, utterance).await?;
        let hits = self.search(&rewritten_query, k).await?;

        Ok(Retrieval {
            rewritten_query,
            hits,
        })
    }

    /// Searches for an already standalone query.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, QueryError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = with_timeout(self.embedder.name(), self.timeout, self.embedder.embed(query)).await?;
        let candidates = self.index.search(&vector, k)?;
        let candidate_count = candidates.len();

        let hits: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        debug!(
            query,
            candidates = candidate_count,
            kept = hits.len(),
            min_score = self.min_score,
            "retrieved policy passages"
        );

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IndexError, ServiceError};
    use crate::models::{Chunk, ConversationTurn, IndexEntry};
    use crate::prompt::Prompt;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "table"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| ServiceError::Unavailable {
                    service: "table".to_string(),
                    details: format!("no vector for {text}"),
                })
        }
    }

    struct FixedModel(&'static str);

    #[async_trait]
    impl LanguageModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    fn chunk(id: &str, page: u32) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "LeavePolicy.pdf".to_string(),
            document_title: "LeavePolicy".to_string(),
            page,
            char_offset: 0,
            chunk_index: 0,
            text: format!("passage {id}"),
        }
    }

    fn retriever(min_score: f32, rewrite_to: &'static str) -> Result<Retriever<TableEmbedder, FixedModel>, IndexError> {
        let mut index = FlatIndex::new();
        index.add(vec![
            IndexEntry::new(chunk("leave", 1), vec![1.0, 0.0]),
            IndexEntry::new(chunk("part-time", 2), vec![0.0, 1.0]),
        ])?;

        let table = HashMap::from([
            ("leave days".to_string(), vec![1.0, 0.1]),
            ("part-time leave".to_string(), vec![0.1, 1.0]),
            ("parking".to_string(), vec![-1.0, -1.0]),
        ]);

        let timeout = Duration::from_secs(1);
        Ok(Retriever::new(
            QueryRewriter::new(Arc::new(FixedModel(rewrite_to)), 4, timeout),
            Arc::new(TableEmbedder { table }),
            Arc::new(index),
            min_score,
            timeout,
        ))
    }

    #[tokio::test]
    async fn first_question_is_searched_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let retriever = retriever(0.2, "unused")?;
        let retrieval = retriever.retrieve(&Session::new(), "leave days", 4).await?;

        assert_eq!(retrieval.rewritten_query, "leave days");
        assert_eq!(retrieval.hits.len(), 1);
        assert_eq!(retrieval.hits[0].chunk.chunk_id, "leave");
        Ok(())
    }

    #[tokio::test]
    async fn follow_up_is_rewritten_before_search() -> Result<(), Box<dyn std::error::Error>> {
        let retriever = retriever(0.2, "part-time leave")?;
        let mut session = Session::new();
        session.append(ConversationTurn {
            utterance: "leave days".to_string(),
            rewritten_query: "leave days".to_string(),
            retrieved_chunk_ids: vec!["leave".to_string()],
            answer: "20 days.".to_string(),
            citations: Vec::new(),
            asked_at: Utc::now(),
        });

        let retrieval = retriever.retrieve(&session, "what about part-time?", 4).await?;
        assert_eq!(retrieval.rewritten_query, "part-time leave");
        assert_eq!(retrieval.hits[0].chunk.page, 2);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_above_threshold_is_empty_not_error() -> Result<(), Box<dyn std::error::Error>> {
        let retriever = retriever(0.2, "unused")?;
        let retrieval = retriever.retrieve(&Session::new(), "parking", 4).await?;
        assert!(retrieval.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_as_service_error() -> Result<(), Box<dyn std::error::Error>> {
        let retriever = retriever(0.2, "unused")?;
        let result = retriever.retrieve(&Session::new(), "unknown text", 4).await;
        assert!(matches!(
            result,
            Err(QueryError::Service(ServiceError::Unavailable { .. }))
        ));
        Ok(())
    }
}
