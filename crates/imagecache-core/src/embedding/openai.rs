use async_trait::async_trait;
use imagecache_traits::{CacheError, EmbeddingProvider, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingSettings;

/// OpenAI-compatible `/embeddings` client.
///
/// Every failure is reported as `CacheError::Provider` except a vector of
/// the wrong length, which is a `DimensionMismatch`.
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl OpenAiEmbedding {
    pub fn new(api_key: impl Into<String>, settings: &EmbeddingSettings, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            dimension,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Build a client whose API key is read from `settings.api_key_env`.
    pub fn from_env(settings: &EmbeddingSettings, dimension: usize) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            CacheError::Config(format!(
                "environment variable {} is not set",
                settings.api_key_env
            ))
        })?;
        Ok(Self::new(api_key, settings, dimension))
    }

    /// Dimension the model produces without an explicit `dimensions` request.
    fn native_dimension(model: &str) -> Option<usize> {
        match model {
            "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            "text-embedding-ada-002" => Some(1536),
            _ => None,
        }
    }

    fn requested_dimensions(&self) -> Option<usize> {
        match Self::native_dimension(&self.model) {
            Some(native) if native == self.dimension => None,
            _ if self.model.starts_with("text-embedding-3") => Some(self.dimension),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

fn provider_error(context: &str, err: impl std::fmt::Display) -> CacheError {
    CacheError::Provider(format!("{context}: {err}"))
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = self.normalize_text(text);
        let embeddings = self.embed_batch(&[normalized]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::Provider("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| provider_error("embedding request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::Provider(format!(
                "embedding API error {}: {}",
                status, error_text
            )));
        }

        let data: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| provider_error("invalid embedding response", e))?;
        if data.data.len() != texts.len() {
            return Err(CacheError::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.data.len()
            )));
        }

        let mut sorted = data.data;
        sorted.sort_by_key(|d| d.index);
        sorted
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dimension {
                    return Err(CacheError::DimensionMismatch {
                        expected: self.dimension,
                        actual: d.embedding.len(),
                    });
                }
                Ok(d.embedding)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> EmbeddingSettings {
        EmbeddingSettings {
            base_url: base_url.to_string(),
            model: "test-embedding".to_string(),
            api_key_env: "IMAGECACHE_TEST_KEY".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_embed_returns_vector() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "test-embedding",
                "input": ["a dark forest"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.25, 0.0] }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiEmbedding::new("test-key", &settings(&mock_server.uri()), 3);
        let embedding = provider.embed("  a dark\n forest ").await.unwrap();
        assert_eq!(embedding, vec![0.5, 0.25, 0.0]);
    }

    #[tokio::test]
    async fn test_batch_is_ordered_by_index() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            })))
            .mount(&mock_server)
            .await;

        let provider = OpenAiEmbedding::new("test-key", &settings(&mock_server.uri()), 2);
        let embeddings = provider
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiEmbedding::new("test-key", &settings(&mock_server.uri()), 2);
        match provider.embed("prompt").await {
            Err(CacheError::Provider(message)) => assert!(message.contains("quota exceeded")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_length_is_dimension_mismatch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [1.0, 0.0, 0.0] }]
            })))
            .mount(&mock_server)
            .await;

        let provider = OpenAiEmbedding::new("test-key", &settings(&mock_server.uri()), 2);
        let err = provider.embed("prompt").await.unwrap_err();
        assert_eq!(
            err,
            CacheError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_dimensions_only_requested_when_needed() {
        let mut config = settings("http://localhost");
        config.model = "text-embedding-3-large".to_string();
        assert_eq!(OpenAiEmbedding::new("k", &config, 3072).requested_dimensions(), None);
        assert_eq!(
            OpenAiEmbedding::new("k", &config, 256).requested_dimensions(),
            Some(256)
        );
    }
}
