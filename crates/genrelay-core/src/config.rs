//! Configuration management for genrelay.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GenRelayError, Result};
use crate::provider::ProviderConfig;

/// Top-level genrelay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenRelayConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Fallback chain settings.
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Providers in fallback order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Image-generation chain, tried in order by `/v1/image`.
    #[serde(default)]
    pub image_providers: Vec<ProviderConfig>,

    /// Image-description chain, tried in order by `/v1/vision`.
    #[serde(default)]
    pub vision_providers: Vec<ProviderConfig>,

    /// Learning-plan progress storage.
    #[serde(default)]
    pub learning: LearningSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Overall deadline for one generate request, across all attempts.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Requests allowed per client address per minute. 0 disables the limit.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    300
}

fn default_rate_limit() -> u32 {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Ceiling for a single provider attempt.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

fn default_attempt_timeout() -> u64 {
    120
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl DispatchSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningSettings {
    /// SQLite file for user progress. `None` keeps progress in memory.
    pub db_path: Option<PathBuf>,
}

impl GenRelayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| GenRelayError::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GenRelayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.attempt_timeout_secs == 0 {
            return Err(GenRelayError::Config(
                "dispatch.attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(GenRelayError::Config(
                "server.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(p) = self
            .providers
            .iter()
            .chain(&self.image_providers)
            .chain(&self.vision_providers)
            .find(|p| p.model.trim().is_empty())
        {
            return Err(GenRelayError::Config(format!(
                "provider '{}' has an empty model",
                p.display_name()
            )));
        }
        Ok(())
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GenRelayError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genrelay")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderConfig, ProviderKind};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GenRelayConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.rate_limit_per_minute, 60);
        assert_eq!(cfg.dispatch.attempt_timeout(), Duration::from_secs(120));
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn test_parse_provider_chain_in_order() {
        let cfg = GenRelayConfig::parse(
            r#"
            [dispatch]
            attempt_timeout_secs = 30

            [[providers]]
            kind = "groq"
            model = "llama-3.3-70b-versatile"

            [[providers]]
            name = "backup"
            kind = "gemini"
            model = "gemini-2.0-flash"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.dispatch.attempt_timeout_secs, 30);
        let names: Vec<_> = cfg.providers.iter().map(|p| p.display_name()).collect();
        assert_eq!(names, vec!["groq/llama-3.3-70b-versatile", "backup"]);
    }

    #[test]
    fn test_parse_media_chains_and_rate_limit() {
        let cfg = GenRelayConfig::parse(
            r#"
            [server]
            rate_limit_per_minute = 0

            [[image_providers]]
            kind = "openai"
            model = "dall-e-3"

            [[vision_providers]]
            kind = "openrouter"
            model = "openai/gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.rate_limit_per_minute, 0);
        assert!(cfg.providers.is_empty());
        assert_eq!(cfg.image_providers[0].model, "dall-e-3");
        assert_eq!(cfg.vision_providers[0].kind, ProviderKind::OpenRouter);
    }

    #[test]
    fn test_empty_model_in_media_chain_rejected() {
        let err = GenRelayConfig::parse("[[vision_providers]]\nkind = \"openai\"\nmodel = \" \"")
            .unwrap_err();
        assert!(matches!(err, GenRelayError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = GenRelayConfig::parse("[dispatch]\nattempt_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, GenRelayError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = GenRelayConfig::default();
        cfg.server.port = 8081;
        cfg.providers
            .push(ProviderConfig::new(ProviderKind::Ollama, "llama3.2"));
        cfg.save(&path).unwrap();

        let loaded = GenRelayConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 8081);
        assert_eq!(loaded.providers.len(), 1);
        assert_eq!(loaded.providers[0].kind, ProviderKind::Ollama);
    }
}
