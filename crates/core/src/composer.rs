use crate::error::{QueryError, ServiceError};
use crate::models::{Answer, AnswerOutcome, Citation, RetrievedChunk};
use crate::prompt::{Message, Prompt};
use crate::services::with_timeout;
use crate::traits::LanguageModel;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Returned without calling the model when retrieval found nothing relevant.
pub const NO_RELEVANT_POLICY_RESPONSE: &str =
    "No relevant policy was found for this question. Please rephrase it or contact HR.";

/// What the model is told to say when the supplied passages do not answer the question.
pub const INSUFFICIENT_CONTEXT_REPLY: &str =
    "I don't have enough information in the company policies to answer that question.";

pub const GROUNDING_INSTRUCTIONS: &str = "You are a helpful assistant for company policies. \
Answer the question using ONLY the numbered policy passages supplied in the user message. \
Do not add facts, numbers or advice that are not stated in those passages, and do not rely on general knowledge. \
When you use a passage, mention its document and page. \
If the passages do not contain the answer, reply exactly: \"I don't have enough information in the company policies to answer that question.\"";

const SNIPPET_CHARS: usize = 200;

/// A retrieved chunk as it is placed into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPassage<'a> {
    pub hit: &'a RetrievedChunk,
    pub text: String,
}

pub struct AnswerComposer<M> {
    model: Arc<M>,
    context_budget_chars: usize,
    timeout: Duration,
}

impl<M: LanguageModel> AnswerComposer<M> {
    pub fn new(model: Arc<M>, context_budget_chars: usize, timeout: Duration) -> Self {
        Self {
            model,
            context_budget_chars,
            timeout,
        }
    }

    /// Takes hits in rank order until the character budget is spent. The top
    /// hit is always kept, cut to the budget if it alone exceeds it.
    pub fn select_context<'a>(&self, hits: &'a [RetrievedChunk]) -> Vec<ContextPassage<'a>> {
        let mut passages = Vec::new();
        let mut used = 0usize;

        for hit in hits {
            let length = hit.chunk.text.chars().count();

            if passages.is_empty() && length > self.context_budget_chars {
                passages.push(ContextPassage {
                    hit,
                    text: hit.chunk.text.chars().take(self.context_budget_chars).collect(),
                });
                break;
            }
            if used + length > self.context_budget_chars {
                break;
            }

            used += length;
            passages.push(ContextPassage {
                hit,
                text: hit.chunk.text.clone(),
            });
        }

        passages
    }

    pub fn build_prompt(&self, question: &str, passages: &[ContextPassage<'_>]) -> Prompt {
        let context = passages
            .iter()
            .enumerate()
            .map(|(position, passage)| {
                let chunk = &passage.hit.chunk;
                format!(
                    "[{}] Document: {} ({}), page {}\n{}",
                    position + 1,
                    chunk.document_title,
                    chunk.document_id,
                    chunk.page,
                    passage.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        Prompt::new()
            .with(Message::system(GROUNDING_INSTRUCTIONS))
            .with(Message::user(format!(
                "Policy passages:\n\n{context}\n\nQuestion: {question}"
            )))
    }

    pub async fn compose(&self, question: &str, hits: &[RetrievedChunk]) -> Result<Answer, QueryError> {
        let passages = self.select_context(hits);
        if passages.is_empty() {
            return Ok(abstention(question));
        }

        let prompt = self.build_prompt(question, &passages);
        prompt.validate()?;
        trace!(prompt = %prompt.render(), "grounded prompt");

        let raw = with_timeout(self.model.name(), self.timeout, self.model.complete(&prompt)).await?;
        let text = raw.trim();
        if text.is_empty() {
            return Err(ServiceError::InvalidResponse {
                service: self.model.name().to_string(),
                details: "empty completion".to_string(),
            }
            .into());
        }

        Ok(Answer {
            text: text.to_string(),
            citations: citations_for(&passages),
            outcome: AnswerOutcome::Grounded,
            rewritten_query: question.to_string(),
        })
    }
}

pub fn abstention(question: &str) -> Answer {
    Answer {
        text: NO_RELEVANT_POLICY_RESPONSE.to_string(),
        citations: Vec::new(),
        outcome: AnswerOutcome::Abstained,
        rewritten_query: question.to_string(),
    }
}

/// One citation per distinct (document, page), taken from the best-ranked chunk on that page.
pub fn citations_for(passages: &[ContextPassage<'_>]) -> Vec<Citation> {
    let mut seen = HashSet::new();

    passages
        .iter()
        .filter(|passage| seen.insert((passage.hit.chunk.document_id.as_str(), passage.hit.chunk.page)))
        .map(|passage| {
            let chunk = &passage.hit.chunk;
            Citation {
                document_id: chunk.document_id.clone(),
                document_title: chunk.document_title.clone(),
                page: chunk.page,
                chunk_id: chunk.chunk_id.clone(),
                snippet: Some(snippet(&chunk.text)),
                score: passage.hit.score,
            }
        })
        .collect()
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", head.trim_end())
}
