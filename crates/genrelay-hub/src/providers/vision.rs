//! OpenAI-compatible image description over `/chat/completions`.
//!
//! The chain input is an image URL (http(s) or `data:`); the provider asks
//! the model to describe the picture in detail.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use genrelay_core::error::ProviderError;
use genrelay_core::provider::{GenerationProvider, ProviderConfig};

use super::openai::{chat_content, status_error};

/// Instruction sent alongside every image.
pub const DESCRIBE_INSTRUCTION: &str = "Describe in detail what is shown in this picture.";

pub struct OpenAiVisionProvider {
    client: Client,
    name: String,
    model: String,
    api_key: Option<String>,
    api_url: String,
    max_tokens: u32,
}

impl OpenAiVisionProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            name: config.display_name(),
            model: config.model.clone(),
            api_key,
            api_url: format!("{}/chat/completions", config.api_base().trim_end_matches('/')),
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: [VisionMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct VisionMessage<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[async_trait]
impl GenerationProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, image_url: &str) -> Result<String, ProviderError> {
        debug!("Describing image with {}", self.name);

        let body = VisionRequest {
            model: &self.model,
            messages: [VisionMessage {
                role: "user",
                content: [
                    ContentPart::Text {
                        text: DESCRIBE_INSTRUCTION,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        };

        let mut req = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body_text = resp.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }

        chat_content(&body_text)
    }
}
