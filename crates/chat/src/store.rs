//! Conversation history and its transition primitives.
//!
//! Every transition takes the prior state by value and returns the next one, so
//! a caller holding a `ConversationState` never observes a half-applied update.

use parley_llm::ProviderMessage;

use crate::message::{Message, MessageId};

pub const DEFAULT_GREETING: &str = "Hello! I'm Parley. How can I help you today?";

/// The aggregate a presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    messages: Vec<Message>,
    is_loading: bool,
    error: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::with_greeting(DEFAULT_GREETING)
    }
}

impl ConversationState {
    /// Starts a conversation holding only the welcome greeting.
    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::welcome(greeting)],
            is_loading: false,
            error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Role and content of every message, in transmit order.
    pub fn history(&self) -> Vec<ProviderMessage> {
        self.messages
            .iter()
            .map(Message::to_provider_message)
            .collect()
    }

    pub fn append(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Replaces the content of `id`, but only while it is the last message.
    ///
    /// A superseded or removed placeholder leaves the state untouched.
    pub fn replace_content(mut self, id: MessageId, content: impl Into<String>) -> Self {
        match self.messages.last_mut() {
            Some(last) if last.id == id => last.content = content.into(),
            _ => {
                tracing::trace!(message_id = id.0, "ignored content update for stale message");
            }
        }
        self
    }

    pub fn remove(mut self, id: MessageId) -> Self {
        self.messages.retain(|message| message.id != id);
        self
    }

    /// Truncates to the greeting and clears the error. `is_loading` is kept.
    pub fn reset(mut self) -> Self {
        self.messages.truncate(1);
        self.error = None;
        self
    }

    pub fn with_loading(mut self, is_loading: bool) -> Self {
        self.is_loading = is_loading;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}
