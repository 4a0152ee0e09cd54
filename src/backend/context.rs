//! Conversational memory carried between turns
//!
//! Two interchangeable shapes, chosen by [`ConversationMode`](super::ConversationMode):
//! an explicit message history sent with every chat request, or the opaque
//! continuation token a generate call returns and expects back verbatim.
//! Either way state is only committed after a successful exchange.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::{BackendError, GenerateRequest, InferenceClient};

/// Speaker of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One history entry, in the chat endpoint's wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Backend continuation state for one session
#[async_trait]
pub trait ConversationContext: Send {
    /// Send `prompt` with the current state and commit the result
    ///
    /// On error the state is exactly what it was before the call.
    async fn exchange(
        &mut self,
        client: &InferenceClient,
        model: &str,
        prompt: &str,
    ) -> Result<String, BackendError>;

    /// Forget the conversation, keeping the system instruction
    fn reset(&mut self);
}

/// Explicit history: system entry first, then user/assistant pairs
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl MessageHistory {
    /// Create a history holding at most `max_messages` entries after the system entry
    #[must_use]
    pub fn new(system: &str, max_messages: usize) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system)],
            max_messages,
        }
    }

    /// All entries, system entry first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn commit(&mut self, prompt: &str, reply: &str) {
        self.messages.push(Message::new(Role::User, prompt));
        self.messages.push(Message::new(Role::Assistant, reply));

        let turns = self.messages.len() - 1;
        if turns > self.max_messages {
            // Whole pairs only, so the history never starts with a reply
            let excess = turns - self.max_messages;
            let excess = (excess + excess % 2).min(turns);
            self.messages.drain(1..=excess);
            tracing::debug!(evicted = excess, "trimmed conversation history");
        }
    }
}

#[async_trait]
impl ConversationContext for MessageHistory {
    async fn exchange(
        &mut self,
        client: &InferenceClient,
        model: &str,
        prompt: &str,
    ) -> Result<String, BackendError> {
        let mut request = self.messages.clone();
        request.push(Message::new(Role::User, prompt));

        let reply = client.chat(model, &request).await?;
        self.commit(prompt, &reply);
        Ok(reply)
    }

    fn reset(&mut self) {
        self.messages.truncate(1);
    }
}

/// Opaque continuation: whatever the last generate call returned
#[derive(Debug, Clone)]
pub struct ContinuationToken {
    system: String,
    token: Option<serde_json::Value>,
}

impl ContinuationToken {
    #[must_use]
    pub fn new(system: &str) -> Self {
        Self {
            system: system.to_string(),
            token: None,
        }
    }

    /// The token the next call will replay
    #[must_use]
    pub const fn token(&self) -> Option<&serde_json::Value> {
        self.token.as_ref()
    }
}

#[async_trait]
impl ConversationContext for ContinuationToken {
    async fn exchange(
        &mut self,
        client: &InferenceClient,
        model: &str,
        prompt: &str,
    ) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model,
            prompt,
            system: &self.system,
            context: self.token.as_ref(),
            stream: false,
        };

        let response = client.generate(&request).await?;
        self.token = response.context;
        Ok(response.response)
    }

    fn reset(&mut self) {
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_system_first() {
        let mut history = MessageHistory::new("be brief", 4);
        for i in 0..5 {
            history.commit(&format!("q{i}"), &format!("a{i}"));
        }

        let messages = history.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], Message::new(Role::System, "be brief"));
        assert_eq!(messages[1], Message::new(Role::User, "q3"));
        assert_eq!(messages[4], Message::new(Role::Assistant, "a4"));
    }

    #[test]
    fn test_odd_limit_evicts_whole_pairs() {
        let mut history = MessageHistory::new("sys", 3);
        history.commit("q0", "a0");
        history.commit("q1", "a1");

        let messages = history.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "q1");
    }

    #[test]
    fn test_reset_keeps_system() {
        let mut history = MessageHistory::new("sys", 10);
        history.commit("q", "a");
        history.reset();
        assert_eq!(history.messages(), &[Message::new(Role::System, "sys")]);
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(Message::new(Role::Assistant, "hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
