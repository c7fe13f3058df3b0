use crate::error::PromptError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    messages: Vec<Message>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_text(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// A prompt is valid when it is non-empty, has system instructions only in
    /// first position, no blank messages, and ends on a user message.
    pub fn validate(&self) -> Result<(), PromptError> {
        if self.messages.is_empty() {
            return Err(PromptError::Empty);
        }

        for (position, message) in self.messages.iter().enumerate() {
            if message.content.trim().is_empty() {
                return Err(PromptError::EmptyContent(position));
            }
            if message.role == Role::System && position > 0 {
                return Err(PromptError::MisplacedSystem(position));
            }
        }

        match self.messages.last() {
            Some(message) if message.role == Role::User => Ok(()),
            _ => Err(PromptError::MissingUserTurn),
        }
    }

    /// Flattens the prompt for completion endpoints that take a single string.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|message| {
                let label = match message.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{label}: {}", message.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_prompt_passes() {
        let prompt = Prompt::new()
            .with(Message::system("Answer from context."))
            .with(Message::user("How many leave days?"));
        assert_eq!(prompt.validate(), Ok(()));
        assert_eq!(prompt.system_text(), Some("Answer from context."));
    }

    #[test]
    fn empty_and_blank_prompts_fail() {
        assert_eq!(Prompt::new().validate(), Err(PromptError::Empty));

        let blank = Prompt::new().with(Message::user("   "));
        assert_eq!(blank.validate(), Err(PromptError::EmptyContent(0)));
    }

    #[test]
    fn system_must_lead_and_user_must_close() {
        let late_system = Prompt::new()
            .with(Message::user("hi"))
            .with(Message::system("rules"));
        assert_eq!(late_system.validate(), Err(PromptError::MisplacedSystem(1)));

        let ends_on_assistant = Prompt::new()
            .with(Message::user("hi"))
            .with(Message::assistant("hello"));
        assert_eq!(ends_on_assistant.validate(), Err(PromptError::MissingUserTurn));
    }

    #[test]
    fn render_labels_each_role() {
        let prompt = Prompt::new()
            .with(Message::system("rules"))
            .with(Message::user("question"));
        assert_eq!(prompt.render(), "System: rules\n\nUser: question");
    }

    #[test]
    fn roles_serialize_lowercase() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(Message::assistant("ok"))?;
        assert_eq!(value["role"], "assistant");
        Ok(())
    }
}
