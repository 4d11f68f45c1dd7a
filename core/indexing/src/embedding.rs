/// Embedding oracle
/// Turns text into a fixed-length vector via a local Ollama server

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::OracleError;

/// Text → vector capability consumed by ingestion and resolution
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Configuration for the embedding oracle
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "embeddinggemma".to_string(),
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OLLAMA_URL").unwrap_or(defaults.base_url),
            model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.model),
            timeout_secs: defaults.timeout_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama `/api/embed` client
pub struct OllamaEmbedder {
    config: EmbeddingConfig,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl EmbeddingEngine for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.config.base_url);

        let request_body = json!({
            "model": self.config.model,
            "input": text,
        });

        debug!("Calling Ollama embed at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .context("Failed to call Ollama embedding API")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                service: "Ollama",
                status,
                body,
            }
            .into());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Ollama embedding response")?;

        parse_embed_response(&body)
    }
}

fn parse_embed_response(body: &str) -> Result<Vec<f32>> {
    let parsed: OllamaEmbedResponse = serde_json::from_str(body).map_err(|e| OracleError::Malformed {
        service: "Ollama",
        reason: e.to_string(),
    })?;

    match parsed.embeddings.into_iter().next() {
        Some(embedding) if !embedding.is_empty() => Ok(embedding),
        _ => Err(OracleError::EmptyEmbedding("Ollama").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "embeddinggemma");
    }

    #[test]
    fn test_parse_embed_response() {
        let embedding = parse_embed_response(r#"{"embeddings": [[0.1, 0.2, 0.3]]}"#).unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_empty_embedding_is_an_error() {
        for body in [r#"{"embeddings": []}"#, r#"{"embeddings": [[]]}"#] {
            let err = parse_embed_response(body).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<OracleError>(),
                Some(OracleError::EmptyEmbedding(_))
            ));
        }
    }

    #[test]
    fn test_malformed_response_is_an_error() {
        let err = parse_embed_response("not json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::Malformed { .. })
        ));
    }
}
