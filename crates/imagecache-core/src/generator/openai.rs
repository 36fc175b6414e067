use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use imagecache_traits::{CacheError, GeneratedImage, ImageGenerator, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{AuthHeader, ImageSettings};

/// OpenAI/Azure-compatible `/images/generations` client.
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: String,
    settings: ImageSettings,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: impl Into<String>, settings: &ImageSettings) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            settings: ImageSettings {
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                ..settings.clone()
            },
        }
    }

    /// Build a client whose API key is read from `settings.api_key_env`.
    pub fn from_env(settings: &ImageSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            CacheError::Config(format!(
                "environment variable {} is not set",
                settings.api_key_env
            ))
        })?;
        Ok(Self::new(api_key, settings))
    }

    fn build_prompt(prompt: &str, style: Option<&str>) -> String {
        match style {
            Some(style) => format!("{prompt}\n\nStyle: {style}"),
            None => prompt.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u32,
    size: &'a str,
    quality: &'a str,
    output_format: &'a str,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

fn generation_error(context: &str, err: impl std::fmt::Display) -> CacheError {
    CacheError::Generation(format!("{context}: {err}"))
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str, style: Option<&str>) -> Result<GeneratedImage> {
        let request = ImageGenerationRequest {
            model: &self.settings.model,
            prompt: Self::build_prompt(prompt, style),
            n: 1,
            size: &self.settings.size,
            quality: &self.settings.quality,
            output_format: &self.settings.output_format,
        };

        let builder = self
            .client
            .post(format!("{}/images/generations", self.settings.base_url))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.settings.timeout_secs));
        let builder = match self.settings.auth_header {
            AuthHeader::Bearer => builder.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthHeader::ApiKey => builder.header("api-key", &self.api_key),
        };

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| generation_error("image request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::Generation(format!(
                "image API error {}: {}",
                status, error_text
            )));
        }

        let body: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| generation_error("invalid image response", e))?;
        let encoded = body
            .data
            .into_iter()
            .next()
            .and_then(|image| image.b64_json)
            .ok_or_else(|| CacheError::Generation("response contained no image".to_string()))?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| generation_error("invalid base64 image", e))?;
        if bytes.is_empty() {
            return Err(CacheError::Generation("image API returned an empty image".to_string()));
        }

        Ok(GeneratedImage::Bytes(bytes))
    }
}
