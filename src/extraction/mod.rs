// Extraction oracle — classifies spans of raw text as sensitive and
// produces a non-identifying semantic summary.
//
// The oracle is the only remote-ish call that sees raw values, which is why
// it must be a local model. Its output is validated against a strict schema;
// anything that does not parse is an ExtractionFailure, never a silent
// pass-through.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{PrivacyError, Result};

pub mod patterns;

pub use patterns::PatternDetector;

/// One sensitive span reported by the oracle.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Non-identifying context for this entity ("female patient, mid-40s").
    #[serde(default)]
    pub context: Option<String>,
}

/// The oracle's structured output.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionReport {
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub semantic_summary: String,
}

#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionReport>;
}

const EXTRACTION_PROMPT: &str = r#"You are a privacy officer. Analyze the text below.

Task 1: Identify every personally identifiable value (names, emails, phone numbers, account numbers, handles).
Task 2: Describe the semantic context that is NOT identifying but matters for reasoning (role, intent, condition, amounts).

Respond with strictly valid JSON in exactly this shape, nothing else:
{
  "entities": [
    {"text": "Alice Smith", "type": "PERSON", "context": "account holder requesting a transfer"},
    {"text": "alice@example.com", "type": "EMAIL", "context": null}
  ],
  "semantic_summary": "An account holder asking to move funds between accounts."
}

Text:
"#;

/// Ollama-backed oracle. Temperature pinned to zero for deterministic
/// extraction.
pub struct OllamaExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaExtractor {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.oracle_timeout)
            .build()
            .expect("Failed to create HTTP client");

        OllamaExtractor {
            client,
            base_url: config.ollama_base_url.clone(),
            model: config.extraction_model.clone(),
        }
    }
}

#[async_trait]
impl ExtractionOracle for OllamaExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionReport> {
        let url = format!("{}/api/chat", self.base_url);
        let request_body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": format!("{}{}", EXTRACTION_PROMPT, text)}
            ],
            "options": {"temperature": 0.0},
            "format": "json",
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| PrivacyError::ExtractionFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PrivacyError::ExtractionFailure(format!(
                "oracle API error: {} - {}",
                status, error_text
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PrivacyError::ExtractionFailure(e.to_string()))?;

        let content = payload["message"]["content"].as_str().ok_or_else(|| {
            PrivacyError::ExtractionFailure("oracle response had no message content".to_string())
        })?;

        parse_report(content)
    }
}

/// Parse and validate raw oracle output into a report.
///
/// Tolerates markdown code fences around the JSON (a common model habit) but
/// nothing else: missing required fields or empty span texts are schema
/// violations.
pub fn parse_report(raw: &str) -> Result<ExtractionReport> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let report: ExtractionReport = serde_json::from_str(cleaned)
        .map_err(|e| PrivacyError::ExtractionFailure(format!("unparseable oracle output: {}", e)))?;

    for entity in &report.entities {
        if entity.text.trim().is_empty() {
            return Err(PrivacyError::ExtractionFailure(
                "oracle reported an empty entity span".to_string(),
            ));
        }
        if entity.entity_type.trim().is_empty() {
            return Err(PrivacyError::ExtractionFailure(
                "oracle reported an entity without a type".to_string(),
            ));
        }
    }

    Ok(report)
}
