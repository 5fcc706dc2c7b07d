//! OpenAI-compatible image generation — `/images/generations`.
//!
//! The chain input is the image description; the output is a URL to the
//! generated picture (or a `data:` URL when the upstream inlines base64).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genrelay_core::error::ProviderError;
use genrelay_core::provider::{GenerationProvider, ProviderConfig};

use super::openai::{snippet, status_error};

pub struct OpenAiImageProvider {
    client: Client,
    name: String,
    model: String,
    api_key: Option<String>,
    api_url: String,
}

impl OpenAiImageProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            name: config.display_name(),
            model: config.model.clone(),
            api_key,
            api_url: format!("{}/images/generations", config.api_base().trim_end_matches('/')),
        }
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

#[async_trait]
impl GenerationProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!("Requesting image from {}", self.name);

        let body = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            response_format: "url",
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

        let parsed: ImageResponse = serde_json::from_str(&body_text).map_err(|e| {
            ProviderError::ResponseShape(format!("{} — body: {}", e, snippet(&body_text)))
        })?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseShape("no images in data".to_string()))?;

        match (first.url, first.b64_json) {
            (Some(url), _) if !url.trim().is_empty() => Ok(url),
            (_, Some(b64)) if !b64.is_empty() => Ok(format!("data:image/png;base64,{b64}")),
            _ => Err(ProviderError::ResponseShape(
                "image entry has neither url nor b64_json".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genrelay_core::provider::ProviderKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> OpenAiImageProvider {
        let mut cfg = ProviderConfig::new(ProviderKind::OpenAi, "flux");
        cfg.api_base = Some(base.to_string());
        OpenAiImageProvider::new(Client::new(), &cfg, Some("img-key".into()))
    }

    #[tokio::test]
    async fn test_returns_image_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("Authorization", "Bearer img-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "flux",
                "prompt": "a red fox in snow",
                "response_format": "url"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": 1,
                "data": [{"url": "https://img.example/fox.png"}]
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert_eq!(
            p.generate("a red fox in snow").await.unwrap(),
            "https://img.example/fox.png"
        );
    }

    #[tokio::test]
    async fn test_inline_base64_becomes_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": "iVBORw0KGgo="}]
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert_eq!(
            p.generate("fox").await.unwrap(),
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[tokio::test]
    async fn test_empty_data_is_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert!(matches!(
            p.generate("fox").await.unwrap_err(),
            ProviderError::ResponseShape(_)
        ));
    }

    #[tokio::test]
    async fn test_rejected_prompt_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "content policy violation"}
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert_eq!(
            p.generate("fox").await.unwrap_err(),
            ProviderError::Status {
                status: 400,
                message: "content policy violation".into()
            }
        );
    }
}
