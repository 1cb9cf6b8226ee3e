// Ollama embedding client.
//
// Embeddings are computed locally so the text of an anchor is already
// non-identifying by the time anything leaves the process.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::error::{PrivacyError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.anchor_timeout)
            .build()
            .expect("Failed to create HTTP client");

        OllamaEmbedder {
            client,
            base_url: config.ollama_base_url.clone(),
            model: config.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PrivacyError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PrivacyError::RemoteUnavailable(format!(
                "embedding API error: {} - {}",
                status, error_text
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PrivacyError::RemoteUnavailable(e.to_string()))?;

        let vector: Vec<f32> = payload["embedding"]
            .as_array()
            .ok_or_else(|| {
                PrivacyError::RemoteUnavailable("embedding missing from response".to_string())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.is_empty() {
            return Err(PrivacyError::RemoteUnavailable(
                "embedding response was empty".to_string(),
            ));
        }

        Ok(vector)
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
