use crate::composer::AnswerComposer;
use crate::config::RagConfig;
use crate::conversation::Session;
use crate::error::QueryError;
use crate::models::{Answer, ConversationTurn};
use crate::retriever::{Retrieval, Retriever};
use crate::rewriter::QueryRewriter;
use crate::stores::FlatIndex;
use crate::traits::{Embedder, LanguageModel, VectorIndex};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Answers one conversation turn: rewrite, retrieve, compose, record.
pub struct PolicyAssistant<E, M, I = FlatIndex> {
    retriever: Retriever<E, M, I>,
    composer: AnswerComposer<M>,
    top_k: usize,
}

impl<E, M, I> PolicyAssistant<E, M, I>
where
    E: Embedder,
    M: LanguageModel,
    I: VectorIndex,
{
    pub fn new(index: Arc<I>, embedder: Arc<E>, model: Arc<M>, config: &RagConfig) -> Self {
        let timeout = config.service_timeout();
        let rewriter = QueryRewriter::new(Arc::clone(&model), config.history_window, timeout);

        Self {
            retriever: Retriever::new(rewriter, embedder, index, config.min_score, timeout),
            composer: AnswerComposer::new(model, config.context_budget_chars, timeout),
            top_k: config.top_k,
        }
    }

    pub async fn retrieve(&self, session: &Session, user_text: &str) -> Result<Retrieval, QueryError> {
        self.retriever.retrieve(session, user_text, self.top_k).await
    }

    /// The turn is appended to `session` only when an answer, grounded or
    /// abstaining, was produced. On error the session is left untouched.
    pub async fn answer(&self, session: &mut Session, user_text: &str) -> Result<Answer, QueryError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let retrieval = self.retrieve(session, user_text).await?;
        let answer = self
            .composer
            .compose(&retrieval.rewritten_query, &retrieval.hits)
            .await?;

        info!(
            session = %session.id(),
            turn = session.len() + 1,
            hits = retrieval.hits.len(),
            citations = answer.citations.len(),
            outcome = ?answer.outcome,
            "answered question"
        );

        session.append(ConversationTurn {
            utterance: user_text.to_string(),
            rewritten_query: retrieval.rewritten_query,
            retrieved_chunk_ids: retrieval
                .hits
                .iter()
                .map(|hit| hit.chunk.chunk_id.clone())
                .collect(),
            answer: answer.text.clone(),
            citations: answer.citations.clone(),
            asked_at: Utc::now(),
        });

        Ok(answer)
    }
}
