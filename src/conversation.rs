//! Conversation history and the chat completion service
//!
//! The session keeps an ordered, role-tagged history whose first element is the
//! persona message. History is bounded to `max_history_pairs` user/assistant
//! exchanges; the persona message is never evicted.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system (persona) message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message history with a fixed persona head
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    max_pairs: usize,
}

impl ConversationHistory {
    /// Create a history holding only the persona message
    ///
    /// `max_pairs` is clamped to at least one exchange.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, max_pairs: usize) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            max_pairs: max_pairs.max(1),
        }
    }

    /// Maximum number of messages retained, persona included
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_pairs * 2 + 1
    }

    /// Append a message without trimming
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop the oldest non-persona messages until the history fits
    pub fn trim(&mut self) {
        let capacity = self.capacity();
        if self.messages.len() > capacity {
            let excess = self.messages.len() - capacity;
            self.messages.drain(1..=excess);
            tracing::debug!(evicted = excess, "trimmed conversation history");
        }
    }

    /// Truncate to the persona message
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// All messages, persona first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages, persona included
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the persona message is never removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Remote chat completion capability
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Produce the assistant reply to an ordered message list
    ///
    /// # Errors
    ///
    /// Returns `Error::Service` on network, auth, or response-shape failures
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// A bounded conversation backed by a [`ChatService`]
pub struct ConversationSession {
    service: Box<dyn ChatService>,
    history: Mutex<ConversationHistory>,
}

impl ConversationSession {
    /// Create a session
    #[must_use]
    pub fn new(
        service: Box<dyn ChatService>,
        system_prompt: impl Into<String>,
        max_history_pairs: usize,
    ) -> Self {
        Self {
            service,
            history: Mutex::new(ConversationHistory::new(system_prompt, max_history_pairs)),
        }
    }

    /// Send a user command and return the assistant reply
    ///
    /// The user message is appended (and history trimmed) before the remote call;
    /// the reply is appended only on success. Concurrent submits queue on the
    /// history lock, so at most one request per session is in flight.
    ///
    /// # Errors
    ///
    /// Returns `Error::Service` if the remote call fails. The user message stays
    /// in history.
    pub async fn submit(&self, command: &str) -> Result<String> {
        let mut history = self.history.lock().await;
        history.push(Message::user(command));
        history.trim();

        tracing::debug!(messages = history.len(), "requesting chat completion");
        let reply = self.service.complete(history.messages()).await.map_err(|e| {
            tracing::warn!(error = %e, "chat completion failed");
            e
        })?;
        let reply = reply.trim().to_string();

        history.push(Message::assistant(reply.clone()));
        tracing::info!(reply_len = reply.len(), "assistant replied");
        Ok(reply)
    }

    /// Forget every exchange, keeping the persona message
    pub async fn reset(&self) {
        self.history.lock().await.reset();
        tracing::info!("conversation history reset");
    }

    /// Copy of the current history
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.messages().to_vec()
    }
}

/// Chat completion settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatCompletions {
    client: reqwest::Client,
    api_key: SecretString,
    settings: ChatSettings,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatCompletions {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, settings: ChatSettings) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            settings,
        })
    }
}

#[async_trait]
impl ChatService for ChatCompletions {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.settings.model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Service(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Service(format!("malformed chat response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Service("chat response had no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Replies with "reply N" and records every request
    struct Scripted {
        calls: Arc<StdMutex<Vec<Vec<Message>>>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatService for Scripted {
        async fn complete(&self, messages: &[Message]) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            if self.fail {
                return Err(Error::Service("401 unauthorized".to_string()));
            }
            Ok(format!("  reply {}  ", calls.len()))
        }
    }

    fn session(max_pairs: usize, fail: bool) -> (ConversationSession, Arc<StdMutex<Vec<Vec<Message>>>>) {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let service = Scripted {
            calls: Arc::clone(&calls),
            fail,
        };
        (
            ConversationSession::new(Box::new(service), "you are ada", max_pairs),
            calls,
        )
    }

    #[test]
    fn test_trim_keeps_persona_and_newest() {
        let mut history = ConversationHistory::new("persona", 2);
        for i in 0..4 {
            history.push(Message::user(format!("q{i}")));
            history.push(Message::assistant(format!("a{i}")));
            history.trim();
        }

        assert_eq!(history.len(), 5);
        assert_eq!(history.messages()[0], Message::system("persona"));
        assert_eq!(history.messages()[1], Message::user("q2"));
        assert_eq!(history.messages()[4], Message::assistant("a3"));
    }

    #[test]
    fn test_zero_pairs_clamped() {
        let history = ConversationHistory::new("persona", 0);
        assert_eq!(history.capacity(), 3);
    }

    #[tokio::test]
    async fn test_submit_appends_both_turns() {
        let (session, calls) = session(15, false);

        let reply = session.submit("what is the weather").await.unwrap();
        assert_eq!(reply, "reply 1");

        let history = session.history().await;
        assert_eq!(
            history,
            vec![
                Message::system("you are ada"),
                Message::user("what is the weather"),
                Message::assistant("reply 1"),
            ]
        );

        // The service sees the user message but not its own reply
        let sent = calls.lock().unwrap()[0].clone();
        assert_eq!(sent.last(), Some(&Message::user("what is the weather")));
    }

    #[tokio::test]
    async fn test_history_bounded_over_many_turns() {
        let (session, calls) = session(3, false);

        for i in 0..20 {
            session.submit(&format!("question {i}")).await.unwrap();
            let history = session.history().await;
            assert!(history.len() <= 7);
            assert_eq!(history[0], Message::system("you are ada"));
        }

        // Trimming happens before the call, so requests never exceed capacity either
        assert!(calls.lock().unwrap().iter().all(|sent| sent.len() <= 7));
    }

    #[tokio::test]
    async fn test_failed_submit_leaves_user_message() {
        let (session, _) = session(15, true);

        let err = session.submit("hello there").await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));

        let history = session.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], Message::user("hello there"));
    }

    #[tokio::test]
    async fn test_reset_keeps_only_persona() {
        let (session, _) = session(15, false);
        session.submit("one").await.unwrap();
        session.submit("two").await.unwrap();

        session.reset().await;

        assert_eq!(session.history().await, vec![Message::system("you are ada")]);
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let settings = ChatSettings {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 500,
            temperature: 0.7,
        };
        assert!(ChatCompletions::new(SecretString::from(String::new()), settings).is_err());
    }
}
