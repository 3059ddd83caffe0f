pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const SCRIPTED_MODEL: &str = "scripted";

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Backends `create_provider` knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    /// Offline echo provider, no network.
    Scripted,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Scripted => "scripted",
        }
    }

    /// Parses a provider id, accepting a few aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "openai" | "rig-openai" => Some(ProviderKind::OpenAi),
            "gemini" | "google" | "rig-gemini" => Some(ProviderKind::Gemini),
            "scripted" | "echo" | "offline" => Some(ProviderKind::Scripted),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Gemini => "Gemini (Google)",
            ProviderKind::Scripted => "Scripted (offline)",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
            ProviderKind::Gemini => DEFAULT_GEMINI_MODEL,
            ProviderKind::Scripted => SCRIPTED_MODEL,
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_ENDPOINT,
            ProviderKind::Gemini => DEFAULT_GEMINI_ENDPOINT,
            ProviderKind::Scripted => "",
        }
    }

    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Scripted => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env_var().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases_and_ignores_case() {
        assert_eq!(ProviderKind::parse(" Gemini "), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("google"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("rig-openai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("echo"), Some(ProviderKind::Scripted));
        assert_eq!(ProviderKind::parse("anthropic"), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_id() {
        for kind in [
            ProviderKind::Gemini,
            ProviderKind::OpenAi,
            ProviderKind::Scripted,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn only_network_backends_need_keys() {
        assert!(ProviderKind::OpenAi.requires_api_key());
        assert!(ProviderKind::Gemini.requires_api_key());
        assert!(!ProviderKind::Scripted.requires_api_key());
    }
}
