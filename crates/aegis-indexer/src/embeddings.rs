//! Embedding inference client
//!
//! Batch embedding against the co-located embedding server with the
//! bounded retry profile (3 attempts, 5 s × attempt backoff).

use aegis_common::{retry, EmbeddingConfig, Error, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        EmbeddingClient {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Embed a batch of texts; one vector per input, in order
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response: EmbedResponse = retry::retry(
            "embed batch",
            retry::RetryConfig::embedding(),
            true,
            || async {
                let response = self
                    .client
                    .post(format!("{}/embed", self.config.base_url()))
                    .json(&serde_json::json!({ "texts": texts }))
                    .timeout(Duration::from_secs(120))
                    .send()
                    .await?
                    .error_for_status()?;
                response.json::<EmbedResponse>().await
            },
        )
        .await
        .map_err(|e| Error::Embedding(e.to_string()))?;

        if response.vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "embedding count mismatch: {} texts, {} vectors",
                texts.len(),
                response.vectors.len()
            )));
        }
        Ok(response.vectors)
    }

    /// Embed one text
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".into()))
    }

    /// Health probe used by the migration's pre-flight check
    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/health", self.config.base_url()))
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(response.json().await?)
    }
}
