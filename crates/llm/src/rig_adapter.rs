use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::{gemini, openai};
use rig::streaming::{StreamedAssistantContent, StreamingCompletionResponse};
use snafu::{ResultExt, ensure};

use crate::events::Role;
use crate::model::ProviderKind;
use crate::provider::{
    CompletionsFailedSnafu, EmptyMessageSetSnafu, EventSink, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamRequest, UnsupportedProviderSnafu,
    event_channel,
};

/// Streams completions from a hosted model through rig-core.
pub struct RigProviderAdapter {
    kind: ProviderKind,
    config: ProviderConfig,
}

impl RigProviderAdapter {
    pub fn new(kind: ProviderKind, config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            kind != ProviderKind::Scripted,
            UnsupportedProviderSnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );
        ensure!(
            !kind.requires_api_key() || !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { kind, config })
    }

    fn build_openai_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-openai-client",
        })
    }

    fn build_gemini_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-gemini-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &StreamRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig exposes a single preamble field, so system-role messages are folded into it.
        for message in &request.messages {
            if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
                preamble_parts.push(message.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream<M>(
        model: M,
        request: &StreamRequest,
    ) -> ProviderResult<StreamingCompletionResponse<M::StreamingResponse>>
    where
        M: CompletionModel,
    {
        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                session_id = request.target.session_id.0,
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
                target: request.target,
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    /// Text of a streamed item, if it carries any.
    fn item_text<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(text.text),
            StreamedAssistantContent::Text(_)
            | StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker<M>(
        model: M,
        provider_id: String,
        request: StreamRequest,
        mut sink: EventSink,
    ) where
        M: CompletionModel + 'static,
    {
        let session_id = sink.target().session_id.0;
        let mut stream = match Self::open_stream(model, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    session_id,
                    provider_id = %provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                sink.fail(error.to_string());
                return;
            }
        };

        let mut fragment_count = 0_usize;

        loop {
            tokio::select! {
                _ = sink.stopped() => {
                    tracing::debug!(session_id, "provider stream cancelled");
                    stream.cancel();
                    return;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            let Some(text) = Self::item_text(item) else {
                                continue;
                            };
                            fragment_count += 1;
                            if !sink.delta(text) {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                session_id,
                                fragment_count,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            sink.fail(error.to_string());
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(session_id, fragment_count, "provider stream finished");
        sink.done();
    }

    fn spawnable_worker(
        &self,
        request: StreamRequest,
        sink: EventSink,
    ) -> ProviderResult<ProviderWorker> {
        let provider_id = self.config.provider_id.clone();
        let model_id = request.model_id.clone();

        let worker: ProviderWorker = match self.kind {
            ProviderKind::OpenAi => {
                let model = Self::build_openai_client(&self.config)?.completion_model(model_id);
                Box::pin(Self::run_stream_worker(
                    model,
                    provider_id,
                    request,
                    sink,
                ))
            }
            ProviderKind::Gemini => {
                let model = Self::build_gemini_client(&self.config)?.completion_model(model_id);
                Box::pin(Self::run_stream_worker(
                    model,
                    provider_id,
                    request,
                    sink,
                ))
            }
            ProviderKind::Scripted => {
                return UnsupportedProviderSnafu {
                    stage: "rig-adapter-worker",
                    provider_id,
                }
                .fail();
            }
        };

        Ok(worker)
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        self.kind.display_name()
    }

    fn default_model(&self) -> &str {
        self.kind.default_model()
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        request.ensure_has_messages("stream-chat")?;

        let (sink, stream) = event_channel(request.target);
        let worker = self.spawnable_worker(request, sink)?;

        Ok(ProviderStreamHandle { stream, worker })
    }
}
