use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_chat::{DEFAULT_GREETING, RequestOptions};
use parley_llm::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "gemini";
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Blank means the provider's own default endpoint.
    #[serde(default)]
    pub endpoint: String,
    /// Blank means the provider's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub preamble: Option<String>,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model: String::new(),
            max_tokens: None,
            temperature: None,
            preamble: None,
            greeting: default_greeting(),
        }
    }
}

impl ProviderSettings {
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        ProviderKind::parse(&self.provider_id)
    }

    /// Configured key, else the provider's conventional environment variable.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }

        self.provider_kind()
            .and_then(|kind| kind.api_key_env_var())
            .and_then(|name| std::env::var(name).ok())
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    }

    pub fn resolved_endpoint(&self) -> String {
        if !self.endpoint.is_empty() {
            return self.endpoint.clone();
        }

        self.provider_kind()
            .map(|kind| kind.default_endpoint().to_string())
            .unwrap_or_default()
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            &self.provider_id,
            self.resolved_api_key(),
            self.resolved_endpoint(),
        )
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            model_id: (!self.model.is_empty()).then(|| self.model.clone()),
            preamble: self.preamble.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        self.model = self.model.trim().to_string();
        self.preamble = self
            .preamble
            .map(|preamble| preamble.trim().to_string())
            .filter(|preamble| !preamble.is_empty());
        self.temperature = self.temperature.filter(|value| value.is_finite());
        if self.greeting.trim().is_empty() {
            self.greeting = default_greeting();
        }

        self
    }
}

/// Layered settings: defaults, then the JSON file, then `PARLEY_*` variables.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ProviderSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ProviderSettings> {
        self.settings.load_full()
    }

    /// Replaces the in-memory settings without touching disk.
    pub fn replace(&self, settings: ProviderSettings) {
        self.settings.store(Arc::new(settings.normalized()));
    }

    /// Persists `settings` and makes them current.
    ///
    /// An API key supplied only through `PARLEY_API_KEY` is never written out.
    pub fn update(&self, settings: ProviderSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        let on_disk = disk_copy(
            &normalized_settings,
            &self.file_settings(),
            env_api_key().as_deref(),
        );
        self.persist(&on_disk)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults plus the JSON file, without the environment layer.
    fn file_settings(&self) -> ProviderSettings {
        file_figment(&self.config_path)
            .extract::<ProviderSettings>()
            .map(ProviderSettings::normalized)
            .unwrap_or_default()
    }

    fn load_from_disk(path: &Path) -> ProviderSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        let figment = file_figment(path).merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ProviderSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ProviderSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ProviderSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn file_figment(path: &Path) -> Figment {
    let figment = Figment::from(Serialized::defaults(ProviderSettings::default()));
    if path.exists() {
        figment.merge(Json::file(path))
    } else {
        figment
    }
}

fn env_api_key() -> Option<String> {
    Figment::from(Env::prefixed(ENV_PREFIX).only(&["api_key"]))
        .extract_inner::<String>("api_key")
        .ok()
}

/// Copy of `settings` fit for disk. A key equal to the one from the
/// environment is swapped for whatever the file already held.
fn disk_copy(
    settings: &ProviderSettings,
    file_settings: &ProviderSettings,
    env_api_key: Option<&str>,
) -> ProviderSettings {
    let mut copy = settings.clone();
    let key_from_env = env_api_key
        .map(str::trim)
        .is_some_and(|key| !key.is_empty() && key == settings.api_key);
    if key_from_env {
        copy.api_key = file_settings.api_key.clone();
    }
    copy
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}
