use crate::models::ConversationTurn;
use uuid::Uuid;

/// One user's conversation. Turns are append-only and live as long as the value.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    turns: Vec<ConversationTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// The most recent `limit` turns, oldest first.
    pub fn history(&self, limit: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Forgets every turn; the session id is kept.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(utterance: &str) -> ConversationTurn {
        ConversationTurn {
            utterance: utterance.to_string(),
            rewritten_query: utterance.to_string(),
            retrieved_chunk_ids: Vec::new(),
            answer: format!("answer to {utterance}"),
            citations: Vec::new(),
            asked_at: Utc::now(),
        }
    }

    #[test]
    fn history_returns_latest_turns_oldest_first() {
        let mut session = Session::new();
        for utterance in ["one", "two", "three", "four"] {
            session.append(turn(utterance));
        }

        let window: Vec<&str> = session
            .history(2)
            .iter()
            .map(|turn| turn.utterance.as_str())
            .collect();
        assert_eq!(window, vec!["three", "four"]);
        assert_eq!(session.history(10).len(), 4);
        assert!(session.history(0).is_empty());
    }

    #[test]
    fn clear_keeps_identity() {
        let mut session = Session::new();
        let id = session.id();
        session.append(turn("one"));
        session.clear();
        assert!(session.is_empty());
        assert_eq!(session.id(), id);
    }

    #[test]
    fn sessions_are_independent() {
        let mut first = Session::new();
        let second = Session::new();
        first.append(turn("one"));
        assert_ne!(first.id(), second.id());
        assert!(second.is_empty());
    }
}
