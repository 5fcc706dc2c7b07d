//! OpenAI-compatible provider — works with OpenAI, OpenRouter, Groq, Ollama, etc.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genrelay_core::error::ProviderError;
use genrelay_core::provider::{GenerationProvider, ProviderConfig, ProviderKind};

/// OpenAI-compatible provider.
///
/// Works with any API that follows the OpenAI chat completions format:
/// - OpenAI (api.openai.com)
/// - OpenRouter (openrouter.ai)
/// - Groq (api.groq.com)
/// - Ollama (localhost:11434)
pub struct OpenAiProvider {
    client: Client,
    name: String,
    kind: ProviderKind,
    model: String,
    api_key: Option<String>,
    api_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: Option<String>) -> Self {
        let api_url = format!("{}/chat/completions", config.api_base().trim_end_matches('/'));

        let mut max_tokens = config.max_tokens;
        if config.kind == ProviderKind::Groq {
            // Groq counts input + max_tokens against a tight per-minute budget.
            max_tokens = max_tokens.min(1024);
        }

        Self {
            client,
            name: config.display_name(),
            kind: config.kind,
            model: config.model.clone(),
            api_key,
            api_url,
            max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Internal request body.
#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: [ApiRequestMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiRequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Internal response body.
#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Keep at most 200 bytes of an upstream body, cut on a char boundary.
pub(crate) fn snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Pull the first non-blank message content out of a chat completions body.
pub(crate) fn chat_content(body: &str) -> Result<String, ProviderError> {
    let api_resp: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseShape(format!("{} — body: {}", e, snippet(body))))?;

    api_resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ProviderError::ResponseShape("no message content in choices".to_string()))
}

/// Build a `Status` error, preferring the provider's own `error.message`.
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| snippet(body).to_string());
    ProviderError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!("Calling {} model: {}", self.kind, self.model);

        let body = ApiRequest {
            model: &self.model,
            messages: [ApiRequestMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut req = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body_text = resp.text().await?;

        debug!("API response status: {}, body length: {}", status, body_text.len());

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }

        chat_content(&body_text)
    }
}
