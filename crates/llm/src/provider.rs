use std::future::Future;
use std::pin::Pin;

use snafu::{OptionExt, Snafu, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::events::{Role, StreamEventMapped, StreamTarget};
use crate::model::ProviderKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }

    /// Backend named by `provider_id`. A blank id selects Gemini.
    pub fn kind(&self) -> ProviderResult<ProviderKind> {
        if self.provider_id.is_empty() {
            return Ok(ProviderKind::Gemini);
        }

        ProviderKind::parse(&self.provider_id).context(UnsupportedProviderSnafu {
            stage: "resolve-provider-kind",
            provider_id: self.provider_id.clone(),
        })
    }
}

/// One history entry as sent downstream: role and content only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl StreamRequest {
    pub fn new(
        target: StreamTarget,
        model_id: impl Into<String>,
        messages: Vec<ProviderMessage>,
    ) -> Self {
        Self {
            target,
            model_id: model_id.into(),
            messages,
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the final user turn, if the history ends with one.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| matches!(message.role, Role::User))
            .map(|message| message.content.as_str())
    }

    pub(crate) fn ensure_has_messages(&self, stage: &'static str) -> ProviderResult<()> {
        ensure!(
            !self.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage,
                target: self.target,
            }
        );
        Ok(())
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for {target:?} has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Text reported when a worker goes away without sending `Done` or `Error`.
pub const STREAM_CLOSED_MESSAGE: &str = "provider stream ended before a terminal event";

/// Receiving half of one provider stream.
///
/// Yields exactly one terminal event: a worker that hangs up early is turned
/// into an `Error`, and nothing is yielded after the terminal event.
/// Dropping the stream tells the worker to stop.
pub struct ProviderEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    stop_tx: Option<oneshot::Sender<()>>,
    finished: bool,
}

impl ProviderEventStream {
    pub async fn next_event(&mut self) -> Option<StreamEventMapped> {
        if self.finished {
            return None;
        }

        let event = self
            .events
            .recv()
            .await
            .unwrap_or_else(|| StreamEventMapped::error(self.target, STREAM_CLOSED_MESSAGE));
        self.finished = event.is_terminal();
        Some(event)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Sending half owned by a provider worker.
pub(crate) struct EventSink {
    target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEventMapped>,
    stop_rx: oneshot::Receiver<()>,
}

impl EventSink {
    pub(crate) fn target(&self) -> StreamTarget {
        self.target
    }

    /// Returns false once the receiving side is gone.
    pub(crate) fn delta(&self, text: impl Into<String>) -> bool {
        self.events
            .send(StreamEventMapped::delta(self.target, text))
            .is_ok()
    }

    pub(crate) fn done(self) {
        let _ = self.events.send(StreamEventMapped::done(self.target));
    }

    pub(crate) fn fail(self, detail: impl Into<String>) {
        let _ = self.events.send(StreamEventMapped::error(self.target, detail));
    }

    /// Resolves when the stream is dropped.
    pub(crate) async fn stopped(&mut self) {
        let _ = (&mut self.stop_rx).await;
    }

    pub(crate) fn is_stopped(&mut self) -> bool {
        !matches!(
            self.stop_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Opens the channel pair for one session.
pub(crate) fn event_channel(target: StreamTarget) -> (EventSink, ProviderEventStream) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    (
        EventSink {
            target,
            events: event_tx,
            stop_rx,
        },
        ProviderEventStream {
            target,
            events: event_rx,
            stop_tx: Some(stop_tx),
            finished: false,
        },
    )
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

/// Transport seam between the chat controller and a remote text service.
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    /// Opens a stream for `request`. The returned worker must be polled (usually
    /// spawned) for events to arrive on the returned stream.
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SessionId, StreamEventPayload};

    fn target() -> StreamTarget {
        StreamTarget::new(SessionId::new(7))
    }

    #[test]
    fn config_kind_defaults_blank_id_to_gemini() {
        let config = ProviderConfig::new("  ", "key", "");
        assert_eq!(config.kind().ok(), Some(ProviderKind::Gemini));

        let config = ProviderConfig::new("carrier-pigeon", "key", "");
        assert!(matches!(
            config.kind(),
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn last_user_content_skips_trailing_assistant_turns() {
        let request = StreamRequest::new(
            target(),
            "model",
            vec![
                ProviderMessage::new(Role::User, "first"),
                ProviderMessage::new(Role::Assistant, "reply"),
            ],
        );
        assert_eq!(request.last_user_content(), Some("first"));
    }

    #[tokio::test]
    async fn stream_ends_after_first_terminal_event() {
        let (sink, mut stream) = event_channel(target());
        assert!(sink.delta("a"));
        sink.done();

        assert_eq!(
            stream.next_event().await.map(|event| event.payload),
            Some(StreamEventPayload::Delta("a".to_string()))
        );
        assert_eq!(
            stream.next_event().await.map(|event| event.payload),
            Some(StreamEventPayload::Done)
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn hang_up_without_terminal_event_becomes_error() {
        let (sink, mut stream) = event_channel(target());
        drop(sink);

        assert_eq!(
            stream.next_event().await.map(|event| event.payload),
            Some(StreamEventPayload::Error(STREAM_CLOSED_MESSAGE.to_string()))
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_worker() {
        let (mut sink, stream) = event_channel(target());
        assert!(!sink.is_stopped());

        drop(stream);
        sink.stopped().await;
        assert!(!sink.delta("late"));
    }
}
