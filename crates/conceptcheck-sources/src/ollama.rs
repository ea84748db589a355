//! Ollama (local model server) embedding backend.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use conceptcheck_core::error::FetchError;
use conceptcheck_core::traits::EmbeddingModel;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Dense embeddings from a local Ollama instance.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, text), fields(model = %self.model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, FetchError> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(DEFAULT_TIMEOUT_SECS)
                } else if e.is_connect() {
                    FetchError::Network(format!(
                        "Ollama not reachable at {}. Is it running? Start with: ollama serve",
                        self.base_url
                    ))
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(FetchError::NotFound(format!(
                "model '{}' not found locally. Pull it with: ollama pull {}",
                self.model, self.model
            )));
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status,
                message: body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("failed to parse embedding response: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(FetchError::Decode("empty embedding".into()));
        }
        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_json(serde_json::json!({
                "model": "nomic-embed-text",
                "prompt": "a tree of nodes"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.1, 0.2, 0.3]})),
            )
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&server.uri(), DEFAULT_MODEL).unwrap();
        let vector = embedder.embed("a tree of nodes").await.unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&server.uri(), "missing-model").unwrap();
        let err = embedder.embed("text").await.unwrap_err();
        assert!(err.to_string().contains("ollama pull missing-model"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn empty_embedding_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"embedding": []})))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&server.uri(), DEFAULT_MODEL).unwrap();
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        // nothing listens on port 9 of localhost in test environments
        let embedder = OllamaEmbedder::new("http://127.0.0.1:9", DEFAULT_MODEL).unwrap();
        let err = embedder.embed("text").await.unwrap_err();
        assert!(err.is_transient());
    }
}
