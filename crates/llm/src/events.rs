/// Identifier for one streaming generation session.
///
/// This must change on every send so stale fragments can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a typed session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key stamped on every provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
}

impl StreamTarget {
    pub const fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }
}

/// Wire-side speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Provider-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// One text fragment, in emission order.
    Delta(String),
    Done,
    /// Raw failure detail. Never shown to the user as-is.
    Error(String),
}

/// One provider event routed to a stream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn delta(target: StreamTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Delta(text.into()),
        }
    }

    pub fn done(target: StreamTarget) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn error(target: StreamTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Error(message.into()),
        }
    }

    /// Returns true for `Done` and `Error` payloads.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.payload, StreamEventPayload::Delta(_))
    }
}
