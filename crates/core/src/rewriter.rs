use crate::error::QueryError;
use crate::models::ConversationTurn;
use crate::prompt::{Message, Prompt};
use crate::services::with_timeout;
use crate::traits::LanguageModel;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const REWRITE_INSTRUCTIONS: &str = "You turn follow-up questions about company policies into standalone search queries. \
Use the earlier conversation only to resolve pronouns, ellipsis and references to topics mentioned before. \
Keep every detail of the new question, do not answer it, and reply with the rewritten question on one line.";

const LABELS: [&str; 4] = ["standalone question:", "rewritten question:", "question:", "query:"];

/// Rewrites a follow-up utterance into a self-contained retrieval query.
pub struct QueryRewriter<M> {
    model: Arc<M>,
    window: usize,
    timeout: Duration,
}

impl<M: LanguageModel> QueryRewriter<M> {
    pub fn new(model: Arc<M>, window: usize, timeout: Duration) -> Self {
        Self {
            model,
            window,
            timeout,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Builds the rewrite prompt from at most `window` of the latest turns.
    pub fn build_prompt(&self, history: &[ConversationTurn], utterance: &str) -> Prompt {
        let start = history.len().saturating_sub(self.window);
        let mut prompt = Prompt::new().with(Message::system(REWRITE_INSTRUCTIONS));

        for turn in &history[start..] {
            prompt.push(Message::user(turn.utterance.as_str()));
            let answer = if turn.answer.trim().is_empty() {
                "(no answer)"
            } else {
                turn.answer.as_str()
            };
            prompt.push(Message::assistant(answer));
        }

        prompt.push(Message::user(format!(
            "Rewrite this follow-up as a standalone question: {utterance}"
        )));
        prompt
    }

    /// Without history (or with a zero window) the utterance is returned as given.
    pub async fn rewrite(&self, history: &[ConversationTurn], utterance: &str) -> Result<String, QueryError> {
        if history.is_empty() || self.window == 0 {
            return Ok(utterance.to_string());
        }
        let utterance = utterance.trim();

        let prompt = self.build_prompt(history, utterance);
        prompt.validate()?;

        let raw = with_timeout(self.model.name(), self.timeout, self.model.complete(&prompt)).await?;
        let rewritten = sanitize(&raw).unwrap_or_else(|| utterance.to_string());
        debug!(original = utterance, rewritten = %rewritten, "rewrote follow-up question");

        Ok(rewritten)
    }
}

fn sanitize(raw: &str) -> Option<String> {
    let mut line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;

    for label in LABELS {
        let matches_label = line
            .get(..label.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(label));
        if matches_label {
            line = line[label.len()..].trim();
            break;
        }
    }

    let cleaned = line
        .trim_matches(|ch| matches!(ch, '"' | '\'' | '`' | '\u{201C}' | '\u{201D}'))
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::prompt::Role;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: String,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok(self.reply.clone())
        }
    }

    fn turn(utterance: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            utterance: utterance.to_string(),
            rewritten_query: utterance.to_string(),
            retrieved_chunk_ids: Vec::new(),
            answer: answer.to_string(),
            citations: Vec::new(),
            asked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_history_is_identity_without_model_call() -> Result<(), QueryError> {
        let model = Arc::new(ScriptedModel::new("should not be used"));
        let rewriter = QueryRewriter::new(Arc::clone(&model), 4, Duration::from_secs(1));

        let rewritten = rewriter.rewrite(&[], "What is the leave policy?").await?;
        assert_eq!(rewritten, "What is the leave policy?");

        let padded = "  What is the leave policy?\n";
        assert_eq!(rewriter.rewrite(&[], padded).await?, padded);
        assert_eq!(model.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn follow_up_uses_model_output() -> Result<(), QueryError> {
        let model = Arc::new(ScriptedModel::new(
            "Standalone question: \"What is the paid leave policy for part-time employees?\"\nextra",
        ));
        let rewriter = QueryRewriter::new(Arc::clone(&model), 4, Duration::from_secs(1));
        let history = vec![turn("What is the paid leave policy?", "Employees get 20 days.")];

        let rewritten = rewriter
            .rewrite(&history, "What about for part-time employees?")
            .await?;
        assert_eq!(rewritten, "What is the paid leave policy for part-time employees?");
        assert_eq!(model.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn blank_model_output_falls_back_to_utterance() -> Result<(), QueryError> {
        let model = Arc::new(ScriptedModel::new("  \n \"\" \n"));
        let rewriter = QueryRewriter::new(model, 4, Duration::from_secs(1));
        let history = vec![turn("Dress code?", "Business casual.")];

        assert_eq!(rewriter.rewrite(&history, "And on Fridays?").await?, "And on Fridays?");
        Ok(())
    }

    #[test]
    fn prompt_keeps_only_the_latest_window() {
        let rewriter = QueryRewriter::new(Arc::new(ScriptedModel::new("")), 2, Duration::from_secs(1));
        let history: Vec<_> = (1..=5)
            .map(|i| turn(&format!("question {i}"), &format!("answer {i}")))
            .collect();

        let prompt = rewriter.build_prompt(&history, "and then?");
        let users: Vec<&str> = prompt
            .messages()
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .collect();

        assert_eq!(prompt.system_text(), Some(REWRITE_INSTRUCTIONS));
        assert_eq!(users.len(), 3);
        assert_eq!(users[0], "question 4");
        assert_eq!(users[1], "question 5");
        assert!(users[2].ends_with("and then?"));
        assert_eq!(prompt.validate(), Ok(()));
    }

    #[test]
    fn sanitize_strips_labels_and_quotes() {
        assert_eq!(sanitize("Query: `dress code policy`"), Some("dress code policy".to_string()));
        assert_eq!(sanitize("\n\n  plain question  "), Some("plain question".to_string()));
        assert_eq!(sanitize("   "), None);
    }
}
