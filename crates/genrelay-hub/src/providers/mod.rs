pub mod gemini;
pub mod image;
pub mod openai;
pub mod vision;

pub use gemini::GeminiProvider;
pub use image::OpenAiImageProvider;
pub use openai::OpenAiProvider;
pub use vision::OpenAiVisionProvider;

use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use genrelay_core::config::GenRelayConfig;
use genrelay_core::dispatch::Dispatcher;
use genrelay_core::error::{GenRelayError, Result};
use genrelay_core::provider::{GenerationProvider, ProviderConfig, ProviderKind};

/// What a fallback chain produces from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    /// Prompt in, text out.
    Text,
    /// Image description in, image URL out.
    Image,
    /// Image URL in, description out.
    Vision,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Vision => write!(f, "vision"),
        }
    }
}

/// The three dispatchers the API serves from.
pub struct Chains {
    pub text: Dispatcher,
    pub image: Dispatcher,
    pub vision: Dispatcher,
}

/// Build one text provider from its config entry.
///
/// The shared client carries no timeout of its own; the dispatcher bounds
/// every attempt.
pub fn build_provider(client: &Client, config: &ProviderConfig) -> Result<Arc<dyn GenerationProvider>> {
    build_chain_provider(client, config, ChainKind::Text)
}

/// Build one provider for the given chain. Only the OpenAI-compatible kinds
/// serve image and vision chains.
pub fn build_chain_provider(
    client: &Client,
    config: &ProviderConfig,
    chain: ChainKind,
) -> Result<Arc<dyn GenerationProvider>> {
    let key = match config.kind {
        ProviderKind::Ollama => config.resolved_api_key(),
        _ => Some(config.resolved_api_key().ok_or_else(|| missing_key(config))?),
    };

    let provider: Arc<dyn GenerationProvider> = match (chain, config.kind) {
        (ChainKind::Text, ProviderKind::Gemini) => {
            let key = key.ok_or_else(|| missing_key(config))?;
            Arc::new(GeminiProvider::new(client.clone(), config, key))
        }
        (ChainKind::Text, _) => Arc::new(OpenAiProvider::new(client.clone(), config, key)),
        (_, ProviderKind::Gemini) => {
            return Err(GenRelayError::Config(format!(
                "provider '{}': kind {} cannot serve the {} chain",
                config.display_name(),
                config.kind,
                chain
            )));
        }
        (ChainKind::Image, _) => Arc::new(OpenAiImageProvider::new(client.clone(), config, key)),
        (ChainKind::Vision, _) => Arc::new(OpenAiVisionProvider::new(client.clone(), config, key)),
    };
    Ok(provider)
}

fn missing_key(config: &ProviderConfig) -> GenRelayError {
    let var = config
        .api_key_env
        .as_deref()
        .or(config.kind.default_key_env())
        .unwrap_or("api_key");
    GenRelayError::Config(format!(
        "provider '{}' needs an API key (set api_key or {})",
        config.display_name(),
        var
    ))
}

fn shared_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("genrelay/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn build_chain(
    client: &Client,
    config: &GenRelayConfig,
    entries: &[ProviderConfig],
    chain: ChainKind,
) -> Result<Dispatcher> {
    let providers = entries
        .iter()
        .map(|p| build_chain_provider(client, p, chain))
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Fallback chain ({}): [{}]",
        chain,
        providers
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(" → ")
    );

    Ok(Dispatcher::new(providers).with_attempt_timeout(config.dispatch.attempt_timeout()))
}

/// Build the text fallback chain described by the config, in config order.
pub fn build_dispatcher(config: &GenRelayConfig) -> Result<Dispatcher> {
    build_chain(&shared_client()?, config, &config.providers, ChainKind::Text)
}

/// Build the text, image and vision chains over one shared HTTP client.
pub fn build_chains(config: &GenRelayConfig) -> Result<Chains> {
    let client = shared_client()?;
    Ok(Chains {
        text: build_chain(&client, config, &config.providers, ChainKind::Text)?,
        image: build_chain(&client, config, &config.image_providers, ChainKind::Image)?,
        vision: build_chain(&client, config, &config.vision_providers, ChainKind::Vision)?,
    })
}
