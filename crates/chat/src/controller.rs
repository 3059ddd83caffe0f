//! Streaming session controller.
//!
//! The controller never owns the conversation: callers pass the current
//! [`ConversationState`] in and keep the one handed back. Provider events are
//! pulled with [`ChatController::next_event`] and applied one at a time with
//! [`ChatController::handle_stream_event`], so each fragment lands in the store
//! before the next one is awaited.

use std::sync::Arc;

use parley_llm::{
    LlmProvider, ProviderEventStream, SessionId, StreamEventMapped, StreamEventPayload,
    StreamRequest, StreamTarget,
};
use tokio::task::JoinHandle;

use crate::message::{Message, MessageId, MessageIdAllocator};
use crate::session::{SessionState, SessionTransition};
use crate::store::ConversationState;

/// The only failure text a user ever sees.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while processing your request. Please try again.";

/// Per-request knobs forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub model_id: Option<String>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// Bookkeeping for the one in-flight session.
struct ActiveSession {
    target: StreamTarget,
    placeholder_id: MessageId,
    buffer: String,
    stream: ProviderEventStream,
    _worker: JoinHandle<()>,
}

pub struct ChatController {
    provider: Arc<dyn LlmProvider>,
    options: RequestOptions,
    message_ids: MessageIdAllocator,
    next_session_id: u64,
    session_state: SessionState,
    active: Option<ActiveSession>,
}

impl ChatController {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::with_options(provider, RequestOptions::default())
    }

    pub fn with_options(provider: Arc<dyn LlmProvider>, options: RequestOptions) -> Self {
        Self {
            provider,
            options,
            message_ids: MessageIdAllocator::default(),
            next_session_id: 1,
            session_state: SessionState::Idle,
            active: None,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Model used for requests: the configured one, else the provider default.
    pub fn model_id(&self) -> &str {
        self.options
            .model_id
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn session_state(&self) -> &SessionState {
        &self.session_state
    }

    /// True while a session is in flight.
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.session_state.is_in_flight()
    }

    /// Starts a session for `text`.
    ///
    /// Blank input and sends while a session is in flight return `state` unchanged.
    /// Must be called from within a Tokio runtime: the provider worker is spawned.
    pub fn send_message(&mut self, state: ConversationState, text: &str) -> ConversationState {
        if state.is_loading() || self.is_busy() {
            tracing::debug!("send rejected: a session is already in flight");
            return state;
        }

        if text.trim().is_empty() {
            tracing::debug!("send rejected: blank input");
            return state;
        }

        let target = StreamTarget::new(self.alloc_session_id());
        match self.session_state.apply(SessionTransition::Start(target)) {
            Ok(next) => self.session_state = next,
            Err(rejection) => {
                tracing::warn!(?rejection, "send rejected by session state");
                return state;
            }
        }

        let user_message = Message::user(self.message_ids.alloc(), text);
        let placeholder_id = self.message_ids.alloc();

        // The request never carries the empty placeholder.
        let mut history = state.history();
        history.push(user_message.to_provider_message());

        let state = state
            .append([user_message, Message::assistant_placeholder(placeholder_id)])
            .with_loading(true)
            .with_error(None);

        let request = self.build_request(target, history);
        tracing::info!(
            session_id = target.session_id.0,
            provider_id = %self.provider.id(),
            model_id = %request.model_id,
            history_len = request.messages.len(),
            "starting chat session"
        );

        match self.provider.stream_chat(request) {
            Ok(handle) => {
                self.active = Some(ActiveSession {
                    target,
                    placeholder_id,
                    buffer: String::new(),
                    stream: handle.stream,
                    _worker: tokio::spawn(handle.worker),
                });
                state
            }
            Err(error) => self.fail_session(state, target, placeholder_id, error.to_string()),
        }
    }

    /// Waits for the next event of the in-flight session.
    ///
    /// Pends forever when nothing is in flight, which keeps it usable as a
    /// `tokio::select!` branch. A stream that closes without `Done` or `Error`
    /// is reported as an error event by the provider stream itself.
    pub async fn next_event(&mut self) -> StreamEventMapped {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };

        match active.stream.next_event().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    /// Applies one provider event to `state`.
    ///
    /// Events that do not belong to the in-flight session are ignored.
    pub fn handle_stream_event(
        &mut self,
        state: ConversationState,
        event: StreamEventMapped,
    ) -> ConversationState {
        let Some(active) = self.active.as_mut() else {
            tracing::trace!(session_id = event.target.session_id.0, "event without active session");
            return state;
        };

        if active.target != event.target || !self.session_state.accepts_stream_event(event.target)
        {
            tracing::trace!(
                session_id = event.target.session_id.0,
                active_session_id = active.target.session_id.0,
                "ignored event for superseded session"
            );
            return state;
        }

        match event.payload {
            StreamEventPayload::Delta(fragment) => {
                if let Ok(next) = self
                    .session_state
                    .apply(SessionTransition::Receive(event.target))
                {
                    self.session_state = next;
                }
                active.buffer.push_str(&fragment);
                state.replace_content(active.placeholder_id, active.buffer.clone())
            }
            StreamEventPayload::Done => {
                let Some(active) = self.active.take() else {
                    return state;
                };
                self.transition(SessionTransition::Complete(active.target));
                tracing::info!(
                    session_id = active.target.session_id.0,
                    reply_len = active.buffer.len(),
                    "chat session completed"
                );
                state.with_loading(false)
            }
            StreamEventPayload::Error(detail) => {
                let Some(active) = self.active.take() else {
                    return state;
                };
                self.fail_session(state, active.target, active.placeholder_id, detail)
            }
        }
    }

    /// Truncates the conversation to its greeting. Safe at any time.
    ///
    /// An in-flight session keeps running, but its placeholder is gone, so its
    /// remaining fragments no longer match the last message and are dropped.
    pub fn reset_conversation(&mut self, state: ConversationState) -> ConversationState {
        if !self.session_state.is_in_flight() {
            self.transition(SessionTransition::ResetToIdle);
        }
        tracing::debug!(in_flight = self.is_busy(), "conversation reset");
        state.reset()
    }

    /// Drives the in-flight session, if any, until it completes or fails.
    pub async fn run_until_idle(&mut self, mut state: ConversationState) -> ConversationState {
        while self.active.is_some() {
            let event = self.next_event().await;
            state = self.handle_stream_event(state, event);
        }
        state
    }

    /// Sends `text` and waits for the whole reply.
    pub async fn send(&mut self, state: ConversationState, text: &str) -> ConversationState {
        let state = self.send_message(state, text);
        self.run_until_idle(state).await
    }

    fn alloc_session_id(&mut self) -> SessionId {
        let id = SessionId::new(self.next_session_id);
        self.next_session_id = self.next_session_id.saturating_add(1);
        id
    }

    fn build_request(
        &self,
        target: StreamTarget,
        history: Vec<parley_llm::ProviderMessage>,
    ) -> StreamRequest {
        let mut request = StreamRequest::new(target, self.model_id(), history);
        if let Some(preamble) = &self.options.preamble {
            request = request.with_preamble(preamble.clone());
        }
        if let Some(temperature) = self.options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    fn transition(&mut self, transition: SessionTransition) {
        match self.session_state.apply(transition) {
            Ok(next) => self.session_state = next,
            Err(rejection) => {
                tracing::warn!(?rejection, "session transition rejected");
                self.session_state = SessionState::Idle;
            }
        }
    }

    fn fail_session(
        &mut self,
        state: ConversationState,
        target: StreamTarget,
        placeholder_id: MessageId,
        detail: String,
    ) -> ConversationState {
        tracing::warn!(
            session_id = target.session_id.0,
            error = %detail,
            "chat session failed"
        );
        self.transition(SessionTransition::Fail {
            target,
            message: detail,
        });

        state
            .remove(placeholder_id)
            .with_loading(false)
            .with_error(Some(GENERIC_FAILURE_MESSAGE.to_string()))
    }
}
