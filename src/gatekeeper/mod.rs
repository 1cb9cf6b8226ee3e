// The local shield: the single component that may legitimately see raw
// sensitive values.
//
// Per request it runs Extracting -> Minting -> Substituting -> Anchoring and
// terminates in Sanitized. Extraction and vault failures abort the request
// (fail closed: refusing is always better than leaking). Anchoring failures
// only degrade downstream reasoning and never roll back substitution.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::anchor::AnchorStore;
use crate::error::{PrivacyError, Result};
use crate::extraction::{ExtractedEntity, ExtractionOracle, PatternDetector};
use crate::token;
use crate::vault::{hash_for_logging, IdentityVault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeState {
    Idle,
    Extracting,
    Minting,
    Substituting,
    Anchoring,
    Sanitized,
}

impl SanitizeState {
    fn as_str(&self) -> &'static str {
        match self {
            SanitizeState::Idle => "idle",
            SanitizeState::Extracting => "extracting",
            SanitizeState::Minting => "minting",
            SanitizeState::Substituting => "substituting",
            SanitizeState::Anchoring => "anchoring",
            SanitizeState::Sanitized => "sanitized",
        }
    }
}

/// Outcome of a sanitize call. Holds no raw values beyond the token map the
/// caller needs for its own bookkeeping; the gatekeeper itself retains
/// nothing after returning.
#[derive(Debug, Clone)]
pub struct SanitizeOutcome {
    /// The text with every matched span replaced by its token.
    pub text: String,
    /// token -> original value, for the spans substituted in this request.
    pub tokens: HashMap<String, String>,
    /// Whether the semantic anchor write succeeded. False means reasoning
    /// quality degrades downstream; privacy is unaffected.
    pub anchored: bool,
}

pub struct Gatekeeper {
    oracle: Arc<dyn ExtractionOracle>,
    patterns: PatternDetector,
    vault: IdentityVault,
    anchors: Arc<AnchorStore>,
}

impl Gatekeeper {
    pub fn new(
        oracle: Arc<dyn ExtractionOracle>,
        vault: IdentityVault,
        anchors: Arc<AnchorStore>,
    ) -> Self {
        Self {
            oracle,
            patterns: PatternDetector::new(),
            vault,
            anchors,
        }
    }

    /// Sanitize raw text end to end.
    pub async fn sanitize(&self, raw_text: &str) -> Result<SanitizeOutcome> {
        let mut state = SanitizeState::Idle;

        self.transition(&mut state, SanitizeState::Extracting);
        let report = self.oracle.extract(raw_text).await?;

        let entities = self.merge_entities(raw_text, report.entities);
        debug!(count = entities.len(), "sensitive spans to substitute");

        self.transition(&mut state, SanitizeState::Minting);
        // (span text, token) pairs; distinct (value, type) pairs mint once.
        let mut substitutions: Vec<(String, String)> = Vec::new();
        let mut token_map: HashMap<String, String> = HashMap::new();
        let mut primary: Option<(String, ExtractedEntity)> = None;

        for entity in &entities {
            let tok = self
                .vault
                .get_or_create_token(&entity.text, &entity.entity_type)?;
            debug!(
                token = %tok,
                value_hash = %hash_for_logging(&entity.text),
                "span vaulted"
            );
            if !substitutions.iter().any(|(s, _)| s == &entity.text) {
                substitutions.push((entity.text.clone(), tok.clone()));
            }
            token_map.insert(tok.clone(), entity.text.clone());

            // Anchor policy: the first PERSON-typed entity is the one the
            // semantic summary is about.
            if primary.is_none() && token::normalize_entity_type(&entity.entity_type) == "PERSON" {
                primary = Some((tok.clone(), entity.clone()));
            }
        }

        self.transition(&mut state, SanitizeState::Substituting);
        // Longest span first, so "Jones" can never clobber the inside of a
        // still-unprocessed "Sarah Jones". Each span is replaced globally.
        substitutions.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let mut safe_text = raw_text.to_string();
        for (span, tok) in &substitutions {
            safe_text = safe_text.replace(span, tok);
        }

        self.transition(&mut state, SanitizeState::Anchoring);
        let anchored = self
            .anchor_primary(&primary, &report.semantic_summary, &entities)
            .await;

        self.transition(&mut state, SanitizeState::Sanitized);
        info!(
            spans = substitutions.len(),
            anchored, "sanitization complete"
        );

        Ok(SanitizeOutcome {
            text: safe_text,
            tokens: token_map,
            anchored,
        })
    }

    /// Merge oracle entities with deterministic pattern detections.
    ///
    /// Oracle spans win on overlap; spans the raw text does not actually
    /// contain (oracle hallucinations) are dropped outright.
    fn merge_entities(
        &self,
        raw_text: &str,
        oracle_entities: Vec<ExtractedEntity>,
    ) -> Vec<ExtractedEntity> {
        let mut merged: Vec<ExtractedEntity> = oracle_entities
            .into_iter()
            .filter(|e| {
                let present = raw_text.contains(&e.text);
                if !present {
                    warn!(
                        value_hash = %hash_for_logging(&e.text),
                        "oracle reported a span absent from the text, dropping"
                    );
                }
                present
            })
            .collect();

        for detected in self.patterns.detect(raw_text) {
            let covered = merged
                .iter()
                .any(|e| e.text.contains(&detected.text) || detected.text.contains(&e.text));
            if !covered {
                merged.push(detected);
            }
        }

        merged
    }

    /// Best-effort anchoring of the primary entity's semantic context.
    /// Returns whether the anchor was stored.
    async fn anchor_primary(
        &self,
        primary: &Option<(String, ExtractedEntity)>,
        semantic_summary: &str,
        entities: &[ExtractedEntity],
    ) -> bool {
        let (tok, entity) = match primary {
            Some(p) => p,
            None => return false,
        };

        let context = entity
            .context
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(semantic_summary);
        if context.trim().is_empty() {
            return false;
        }

        let entity_type = token::normalize_entity_type(&entity.entity_type);
        let semantic_text = format!("{}: {}", entity_type, context);
        let metadata = json!({
            "type": "identity",
            "entity_type": entity_type,
        });
        let forbidden: Vec<String> = entities.iter().map(|e| e.text.clone()).collect();

        match self
            .anchors
            .store_anchor(tok, &semantic_text, Some(metadata), &forbidden)
            .await
        {
            Ok(()) => true,
            Err(PrivacyError::AnchorLeak { token }) => {
                // The summary itself carried an identifying value. Not
                // storing it is the containment; the request still succeeds
                // with tokenized text.
                error!(token = %token, "oracle summary contained a raw value, anchor dropped");
                false
            }
            Err(e) => {
                warn!(token = %tok, error = %e, "anchor store unreachable, continuing without anchor");
                false
            }
        }
    }

    fn transition(&self, state: &mut SanitizeState, next: SanitizeState) {
        debug!(from = state.as_str(), to = next.as_str(), "sanitize state");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{AnchorKind, Embedder};
    use crate::db::Database;
    use crate::extraction::ExtractionReport;
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(PrivacyError::RemoteUnavailable("down".to_string()))
        }
    }

    /// Oracle stub returning a canned report.
    struct StubOracle {
        report: std::result::Result<String, ()>,
    }

    impl StubOracle {
        fn ok(raw_json: &str) -> Self {
            Self {
                report: Ok(raw_json.to_string()),
            }
        }

        fn failing() -> Self {
            Self { report: Err(()) }
        }
    }

    #[async_trait]
    impl ExtractionOracle for StubOracle {
        async fn extract(&self, _text: &str) -> Result<ExtractionReport> {
            match &self.report {
                Ok(raw) => crate::extraction::parse_report(raw),
                Err(()) => Err(PrivacyError::ExtractionFailure("oracle down".to_string())),
            }
        }
    }

    fn harness(oracle: StubOracle) -> (Gatekeeper, IdentityVault, Arc<AnchorStore>) {
        harness_with_embedder(oracle, Arc::new(StubEmbedder))
    }

    fn harness_with_embedder(
        oracle: StubOracle,
        embedder: Arc<dyn Embedder>,
    ) -> (Gatekeeper, IdentityVault, Arc<AnchorStore>) {
        let db = Database::open_in_memory().unwrap();
        let vault = IdentityVault::new(db.clone());
        let anchors = Arc::new(AnchorStore::new(db, embedder, 0.0));
        let gk = Gatekeeper::new(Arc::new(oracle), vault.clone(), anchors.clone());
        (gk, vault, anchors)
    }

    const TWO_PERSON_REPORT: &str = r#"{
        "entities": [
            {"text": "Sarah Jones", "type": "PERSON", "context": "sender of the transfer"},
            {"text": "Bob Smith", "type": "PERSON", "context": "recipient"}
        ],
        "semantic_summary": "A transfer of $2000 between two account holders."
    }"#;

    #[tokio::test]
    async fn test_sanitize_replaces_both_people() {
        let (gk, vault, _) = harness(StubOracle::ok(TWO_PERSON_REPORT));
        let out = gk
            .sanitize("Transfer $2000 from Sarah Jones to Bob Smith.")
            .await
            .unwrap();

        assert!(!out.text.contains("Sarah Jones"));
        assert!(!out.text.contains("Bob Smith"));
        assert!(out.text.contains("$2000"));

        let tokens = crate::token::scan(&out.text);
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.text.starts_with("PERSON_")));

        let values: Vec<String> = tokens
            .iter()
            .map(|t| vault.resolve(&t.text).unwrap().unwrap().original_value)
            .collect();
        assert!(values.contains(&"Sarah Jones".to_string()));
        assert!(values.contains(&"Bob Smith".to_string()));
    }

    #[tokio::test]
    async fn test_sanitize_is_stable_across_calls() {
        let (gk, _, _) = harness(StubOracle::ok(TWO_PERSON_REPORT));
        let a = gk.sanitize("Sarah Jones met Bob Smith.").await.unwrap();
        let b = gk.sanitize("Sarah Jones called again.").await.unwrap();

        // Same vault, same value: the same token shows up in both outputs.
        let tok_a = crate::token::scan(&a.text);
        let tok_b = crate::token::scan(&b.text);
        assert!(tok_b.iter().any(|t| tok_a.iter().any(|u| u.text == t.text)));
    }

    #[tokio::test]
    async fn test_substitution_is_longest_span_first() {
        let report = r#"{
            "entities": [
                {"text": "Jones", "type": "PERSON"},
                {"text": "Sarah Jones", "type": "PERSON"}
            ],
            "semantic_summary": ""
        }"#;
        let (gk, _, _) = harness(StubOracle::ok(report));
        let out = gk.sanitize("Sarah Jones and Mr Jones").await.unwrap();

        // "Sarah Jones" must be consumed whole before the shorter "Jones"
        // span is substituted into the remainder.
        assert!(!out.text.contains("Sarah"));
        let tokens = crate::token::scan(&out.text);
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_fail_closed() {
        let (gk, _, _) = harness(StubOracle::failing());
        let result = gk.sanitize("Sarah Jones asked about her account.").await;
        assert!(matches!(result, Err(PrivacyError::ExtractionFailure(_))));
    }

    #[tokio::test]
    async fn test_malformed_oracle_output_is_fail_closed() {
        let (gk, _, _) = harness(StubOracle::ok("sure! here are the entities you asked for"));
        let result = gk.sanitize("Sarah Jones asked about her account.").await;
        assert!(matches!(result, Err(PrivacyError::ExtractionFailure(_))));
    }

    #[tokio::test]
    async fn test_hallucinated_span_is_dropped() {
        let report = r#"{
            "entities": [{"text": "Nonexistent Name", "type": "PERSON"}],
            "semantic_summary": "nothing real"
        }"#;
        let (gk, vault, _) = harness(StubOracle::ok(report));
        let out = gk.sanitize("No names in here at all.").await.unwrap();
        assert_eq!(out.text, "No names in here at all.");
        assert_eq!(vault.record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pattern_detector_supplements_oracle() {
        let report = r#"{"entities": [], "semantic_summary": "someone shared an address"}"#;
        let (gk, vault, _) = harness(StubOracle::ok(report));
        let out = gk
            .sanitize("Reach me at sarah@example.com about this.")
            .await
            .unwrap();
        assert!(!out.text.contains("sarah@example.com"));
        assert!(out.text.contains("EMAIL_"));
        assert_eq!(vault.record_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_anchor_written_for_primary_person() {
        let (gk, _, anchors) = harness(StubOracle::ok(TWO_PERSON_REPORT));
        let out = gk
            .sanitize("Transfer $2000 from Sarah Jones to Bob Smith.")
            .await
            .unwrap();
        assert!(out.anchored);

        let sarah_token = out
            .tokens
            .iter()
            .find(|(_, v)| v.as_str() == "Sarah Jones")
            .map(|(k, _)| k.clone())
            .unwrap();
        let anchor = anchors.fetch_anchor(&sarah_token).unwrap().unwrap();
        assert_eq!(anchor.kind, AnchorKind::Identity);
        assert!(anchor.semantic_text.contains("sender of the transfer"));
        assert!(!anchor.semantic_text.contains("Sarah"));
    }

    #[tokio::test]
    async fn test_anchor_failure_does_not_abort_sanitization() {
        let (gk, _, _) = harness_with_embedder(
            StubOracle::ok(TWO_PERSON_REPORT),
            Arc::new(FailingEmbedder),
        );
        let out = gk
            .sanitize("Transfer $2000 from Sarah Jones to Bob Smith.")
            .await
            .unwrap();
        assert!(!out.anchored);
        assert!(!out.text.contains("Sarah Jones"));
    }

    #[tokio::test]
    async fn test_sanitize_then_restore_round_trips() {
        let (gk, vault, _) = harness(StubOracle::ok(TWO_PERSON_REPORT));
        let original = "Transfer $2000 from Sarah Jones to Bob Smith.";
        let out = gk.sanitize(original).await.unwrap();
        assert_ne!(out.text, original);

        let bridge = crate::restore::RestorationBridge::new(vault, Vec::new());
        let report = bridge.restore(&out.text).unwrap();
        assert_eq!(report.text, original);
        assert!(report.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_leaky_summary_is_contained() {
        let report = r#"{
            "entities": [{"text": "Sarah Jones", "type": "PERSON", "context": "patient Sarah Jones, female"}],
            "semantic_summary": ""
        }"#;
        let (gk, _, anchors) = harness(StubOracle::ok(report));
        let out = gk.sanitize("Schedule for Sarah Jones.").await.unwrap();
        assert!(!out.anchored);

        let tok = out.tokens.keys().next().unwrap();
        assert!(anchors.fetch_anchor(tok).unwrap().is_none());
    }
}
