use std::time::SystemTime;

use parley_llm::{ProviderMessage, Role as ProviderRole};

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Reserved for the welcome greeting.
    pub const WELCOME: MessageId = MessageId(0);

    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Hands out message ids in increasing order, never repeating one.
#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    next: u64,
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self {
            next: MessageId::WELCOME.0 + 1,
        }
    }
}

impl MessageIdAllocator {
    pub fn alloc(&mut self) -> MessageId {
        let id = MessageId::new(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl From<Role> for ProviderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        }
    }
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: SystemTime,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content)
    }

    /// Creates the empty assistant entry that a stream fills in.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self::new(id, Role::Assistant, String::new())
    }

    pub fn welcome(greeting: impl Into<String>) -> Self {
        Self::new(MessageId::WELCOME, Role::Assistant, greeting)
    }

    /// Downstream view of this message: role and content only.
    pub fn to_provider_message(&self) -> ProviderMessage {
        ProviderMessage::new(self.role.into(), self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_never_hands_out_the_welcome_id() {
        let mut ids = MessageIdAllocator::default();
        let first = ids.alloc();
        let second = ids.alloc();

        assert_ne!(first, MessageId::WELCOME);
        assert!(second > first);
    }

    #[test]
    fn provider_view_drops_id_and_timestamp() {
        let message = Message::user(MessageId::new(7), "Hi");
        assert_eq!(
            message.to_provider_message(),
            ProviderMessage::new(ProviderRole::User, "Hi")
        );
    }
}
