use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::model::{ProviderKind, SCRIPTED_MODEL};
use crate::provider::{
    EventSink, LlmProvider, ProviderResult, ProviderStreamHandle, ProviderWorker, StreamRequest,
    event_channel,
};

/// One scripted provider action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Fragment(String),
    /// Emits an error event and ends the stream.
    Fail(String),
    /// Closes the stream without a terminal event.
    Disconnect,
}

/// Ordered replay for one stream. Ends with `Done` unless a `Fail` step ends it first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: fragments
                .into_iter()
                .map(|fragment| ScriptStep::Fragment(fragment.into()))
                .collect(),
        }
    }

    pub fn fail_immediately(message: impl Into<String>) -> Self {
        Self {
            steps: vec![ScriptStep::Fail(message.into())],
        }
    }

    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Fail(message.into()));
        self
    }

    pub fn then_disconnect(mut self) -> Self {
        self.steps.push(ScriptStep::Disconnect);
        self
    }

    /// Splits `text` into word fragments, keeping leading whitespace on each word.
    pub fn echo(text: &str) -> Self {
        let mut fragments = Vec::new();
        let mut current = String::new();
        let mut in_word = false;

        for ch in text.chars() {
            if ch.is_whitespace() && in_word {
                fragments.push(std::mem::take(&mut current));
                in_word = false;
            } else if !ch.is_whitespace() {
                in_word = true;
            }
            current.push(ch);
        }
        if !current.is_empty() {
            fragments.push(current);
        }

        Self::fragments(fragments)
    }
}

enum Reply {
    Queue(Mutex<VecDeque<Script>>),
    Echo,
}

/// Deterministic provider that replays scripts instead of calling a service.
pub struct ScriptedProvider {
    reply: Reply,
    fragment_delay: Option<Duration>,
    requests: Mutex<Vec<StreamRequest>>,
}

pub const EXHAUSTED_SCRIPT_MESSAGE: &str = "scripted provider has no script left";

impl ScriptedProvider {
    /// Replays `scripts` in order, one per stream.
    pub fn sequence(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self::with_reply(Reply::Queue(Mutex::new(scripts.into_iter().collect())))
    }

    pub fn single(script: Script) -> Self {
        Self::sequence([script])
    }

    /// Answers every request by echoing its last user message.
    pub fn echo() -> Self {
        Self::with_reply(Reply::Echo)
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            fragment_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Requests received so far, in call order.
    pub fn recorded_requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_script(&self, request: &StreamRequest) -> Script {
        match &self.reply {
            Reply::Echo => Script::echo(request.last_user_content().unwrap_or_default()),
            Reply::Queue(queue) => queue
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| Script::fail_immediately(EXHAUSTED_SCRIPT_MESSAGE)),
        }
    }

    async fn run_script(mut sink: EventSink, script: Script, fragment_delay: Option<Duration>) {
        let session_id = sink.target().session_id.0;

        for step in script.steps {
            if let Some(delay) = fragment_delay {
                tokio::select! {
                    _ = sink.stopped() => {
                        tracing::debug!(session_id, "scripted stream cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            } else if sink.is_stopped() {
                return;
            }

            match step {
                ScriptStep::Fragment(text) => {
                    if !sink.delta(text) {
                        return;
                    }
                }
                ScriptStep::Fail(message) => {
                    sink.fail(message);
                    return;
                }
                ScriptStep::Disconnect => return,
            }

            tokio::task::yield_now().await;
        }

        sink.done();
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        ProviderKind::Scripted.as_str()
    }

    fn name(&self) -> &str {
        ProviderKind::Scripted.display_name()
    }

    fn default_model(&self) -> &str {
        SCRIPTED_MODEL
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        request.ensure_has_messages("scripted-stream-chat")?;

        let script = self.next_script(&request);
        let (sink, stream) = event_channel(request.target);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let worker: ProviderWorker =
            Box::pin(Self::run_script(sink, script, self.fragment_delay));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Role, SessionId, StreamEventPayload, StreamTarget};
    use crate::provider::{ProviderMessage, STREAM_CLOSED_MESSAGE};

    fn request(session: u64, text: &str) -> StreamRequest {
        StreamRequest::new(
            StreamTarget::new(SessionId::new(session)),
            SCRIPTED_MODEL,
            vec![ProviderMessage::new(Role::User, text)],
        )
    }

    async fn drain(provider: &ScriptedProvider, request: StreamRequest) -> Vec<StreamEventPayload> {
        let handle = provider.stream_chat(request).expect("stream opens");
        let mut stream = handle.stream;
        handle.worker.await;

        let mut payloads = Vec::new();
        while let Some(event) = stream.next_event().await {
            payloads.push(event.payload);
        }
        payloads
    }

    #[test]
    fn echo_script_keeps_whitespace_with_following_word() {
        assert_eq!(
            Script::echo("Hi there  friend"),
            Script::fragments(["Hi", " there", "  friend"])
        );
        assert_eq!(Script::echo(""), Script::default());
    }

    #[tokio::test]
    async fn replays_fragments_then_done() {
        let provider = ScriptedProvider::single(Script::fragments(["Hel", "lo"]));
        let payloads = drain(&provider, request(1, "hey")).await;

        assert_eq!(
            payloads,
            vec![
                StreamEventPayload::Delta("Hel".to_string()),
                StreamEventPayload::Delta("lo".to_string()),
                StreamEventPayload::Done,
            ]
        );
    }

    #[tokio::test]
    async fn fail_step_ends_stream_without_done() {
        let provider =
            ScriptedProvider::single(Script::fragments(["partial"]).then_fail("socket closed"));
        let payloads = drain(&provider, request(1, "hey")).await;

        assert_eq!(
            payloads,
            vec![
                StreamEventPayload::Delta("partial".to_string()),
                StreamEventPayload::Error("socket closed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_surfaces_as_closed_stream_error() {
        let provider = ScriptedProvider::single(Script::fragments(["a"]).then_disconnect());
        let payloads = drain(&provider, request(1, "hey")).await;

        assert_eq!(
            payloads,
            vec![
                StreamEventPayload::Delta("a".to_string()),
                StreamEventPayload::Error(STREAM_CLOSED_MESSAGE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_queue_reports_error() {
        let provider = ScriptedProvider::sequence([]);
        let payloads = drain(&provider, request(1, "hey")).await;

        assert_eq!(
            payloads,
            vec![StreamEventPayload::Error(EXHAUSTED_SCRIPT_MESSAGE.to_string())]
        );
    }

    #[tokio::test]
    async fn records_requests_in_order() {
        let provider = ScriptedProvider::echo();
        drain(&provider, request(1, "first")).await;
        drain(&provider, request(2, "second")).await;

        let recorded = provider.recorded_requests();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].last_user_content(), Some("first"));
        assert_eq!(recorded[1].target.session_id, SessionId::new(2));
    }
}
