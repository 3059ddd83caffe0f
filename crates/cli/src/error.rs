use parley_llm::ProviderError;
use snafu::Snafu;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to create provider '{provider_id}': {source}"))]
    CreateProvider {
        stage: &'static str,
        provider_id: String,
        source: ProviderError,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type CliResult<T> = Result<T, CliError>;
