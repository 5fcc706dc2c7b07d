//! Generation provider trait — the abstraction over remote AI model APIs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A named remote capability that can attempt to satisfy a prompt.
///
/// # Example
///
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl GenerationProvider for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
///         Ok(prompt.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Label used in logs and in the success envelope.
    fn name(&self) -> &str;

    /// Model this provider targets, if it has one.
    fn model(&self) -> &str {
        ""
    }

    /// Generate text for a prompt.
    ///
    /// A well-formed, non-empty answer is `Ok`. Everything else, including a
    /// 2xx response that does not match the expected schema, is an `Err`.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Wire format family of a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Groq,
    Ollama,
    Gemini,
}

impl ProviderKind {
    /// Base URL used when the config does not override it.
    pub fn default_api_base(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Environment variable consulted for the API key when none is configured.
    pub fn default_key_env(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Groq => write!(f, "groq"),
            Self::Ollama => write!(f, "ollama"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// One entry of the fallback chain as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Log label; defaults to `kind/model`.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of an environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: &str) -> Self {
        Self {
            name: None,
            kind,
            model: model.to_string(),
            api_key: None,
            api_key_env: None,
            api_base: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.kind, self.model))
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_base())
    }

    /// Resolve the key: explicit value, then `api_key_env`, then the kind's default variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .or(self.kind.default_key_env())
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_defaults_to_kind_and_model() {
        let cfg = ProviderConfig::new(ProviderKind::Groq, "llama-3.3-70b");
        assert_eq!(cfg.display_name(), "groq/llama-3.3-70b");

        let named = ProviderConfig {
            name: Some("primary".into()),
            ..cfg
        };
        assert_eq!(named.display_name(), "primary");
    }

    #[test]
    fn test_api_base_override() {
        let mut cfg = ProviderConfig::new(ProviderKind::OpenRouter, "x");
        assert_eq!(cfg.api_base(), "https://openrouter.ai/api/v1");
        cfg.api_base = Some("http://127.0.0.1:9000".into());
        assert_eq!(cfg.api_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_explicit_key_wins() {
        let mut cfg = ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini");
        cfg.api_key = Some("sk-test".into());
        cfg.api_key_env = Some("GENRELAY_TEST_UNSET_VARIABLE".into());
        assert_eq!(cfg.resolved_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_env_key_resolves_to_none() {
        let mut cfg = ProviderConfig::new(ProviderKind::Gemini, "gemini-2.0-flash");
        cfg.api_key_env = Some("GENRELAY_TEST_UNSET_VARIABLE".into());
        assert!(cfg.resolved_api_key().is_none());
    }

    #[test]
    fn test_kind_parses_lowercase() {
        let cfg: ProviderConfig =
            toml::from_str("kind = \"openrouter\"\nmodel = \"deepseek/deepseek-chat\"").unwrap();
        assert_eq!(cfg.kind, ProviderKind::OpenRouter);
        assert_eq!(cfg.max_tokens, 2048);
    }
}
