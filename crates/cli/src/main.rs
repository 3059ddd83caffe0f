use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_chat::{ChatController, ConversationState};
use parley_llm::{LlmProvider, ProviderKind, ScriptedProvider, create_provider};
use snafu::ResultExt;

mod error;
mod logging;
mod settings;
mod terminal;

use error::{CliResult, CreateProviderSnafu, SaveSettingsSnafu};
use settings::{ProviderSettings, SettingsStore};

const OFFLINE_FRAGMENT_DELAY: Duration = Duration::from_millis(40);

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Streaming chat with an LLM in the terminal")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Provider id: gemini, openai or scripted
    #[arg(short, long)]
    provider: Option<String>,
    /// Model id passed to the provider
    #[arg(short, long)]
    model: Option<String>,
    /// Use the local echo provider instead of a remote service
    #[arg(long)]
    offline: bool,
    /// Write --provider and --model back to the settings file
    #[arg(long)]
    save: bool,
    /// Debug-level logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, mut settings: ProviderSettings) -> ProviderSettings {
        if let Some(provider) = &self.provider {
            settings.provider_id = provider.clone();
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        settings.normalized()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "parley exited with an error");
            eprintln!("parley: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    let settings = cli.apply_overrides((*store.settings()).clone());

    if cli.save {
        store.update(settings.clone()).context(SaveSettingsSnafu {
            stage: "save-cli-overrides",
        })?;
    } else {
        store.replace(settings.clone());
    }

    let provider = build_provider(&cli, &settings)?;
    tracing::info!(
        provider_id = %provider.id(),
        config_path = ?store.config_path(),
        "provider ready"
    );

    let controller = ChatController::with_options(provider, settings.request_options());
    let state = ConversationState::with_greeting(settings.greeting.clone());
    terminal::run(controller, state).await
}

fn build_provider(cli: &Cli, settings: &ProviderSettings) -> CliResult<Arc<dyn LlmProvider>> {
    if cli.offline || settings.provider_kind() == Some(ProviderKind::Scripted) {
        return Ok(Arc::new(
            ScriptedProvider::echo().with_fragment_delay(OFFLINE_FRAGMENT_DELAY),
        ));
    }

    create_provider(settings.to_provider_config()).context(CreateProviderSnafu {
        stage: "create-provider",
        provider_id: settings.provider_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let cli = Cli::parse_from(["parley", "--provider", " OpenAI ", "-m", "gpt-4o"]);
        let settings = cli.apply_overrides(ProviderSettings::default());

        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.model, "gpt-4o");
    }

    #[test]
    fn offline_flag_uses_scripted_provider() {
        let cli = Cli::parse_from(["parley", "--offline"]);
        let provider = build_provider(&cli, &ProviderSettings::default()).expect("provider");

        assert_eq!(provider.id(), ProviderKind::Scripted.as_str());
    }

    #[test]
    fn unknown_provider_is_reported() {
        let cli = Cli::parse_from(["parley", "--provider", "carrier-pigeon"]);
        let settings = cli.apply_overrides(ProviderSettings::default());

        let error = build_provider(&cli, &settings).err().expect("unsupported provider");
        assert!(error.to_string().contains("carrier-pigeon"));
    }
}
