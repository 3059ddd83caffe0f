use std::sync::Arc;

mod events;
mod model;
mod provider;
mod rig_adapter;
mod scripted;

pub use events::{Role, SessionId, StreamEventMapped, StreamEventPayload, StreamTarget};
pub use model::{
    DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_ENDPOINT, DEFAULT_OPENAI_MODEL,
    ProviderKind, SCRIPTED_MODEL,
};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderError, ProviderEventStream, ProviderMessage,
    ProviderResult, ProviderStreamHandle, ProviderWorker, STREAM_CLOSED_MESSAGE, StreamRequest,
};
pub use rig_adapter::RigProviderAdapter;
pub use scripted::{EXHAUSTED_SCRIPT_MESSAGE, Script, ScriptStep, ScriptedProvider};

/// Builds the provider named by `config.provider_id`. A blank id selects Gemini.
pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    let kind = config.kind()?;
    config.provider_id = kind.as_str().to_string();

    match kind {
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::echo())),
        ProviderKind::OpenAi | ProviderKind::Gemini => {
            Ok(Arc::new(RigProviderAdapter::new(kind, config)?))
        }
    }
}
