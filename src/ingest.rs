// Batch document ingestion: sanitize files through the gatekeeper, then
// upload the clean chunks as document anchors.
//
// Sanitize-before-upload is the whole point: the anchor store never sees a
// raw document. One bad file fails closed for that file only and the batch
// carries on.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::anchor::AnchorStore;
use crate::error::{PrivacyError, Result};
use crate::gatekeeper::Gatekeeper;

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub files_processed: usize,
    pub chunks_stored: usize,
    /// Files that could not be ingested, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Walk `dir` for `.txt`/`.md` files and ingest each one.
pub async fn ingest_dir(
    gatekeeper: &Gatekeeper,
    anchors: &AnchorStore,
    dir: &Path,
    chunk_size: usize,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_text = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        );
        if !is_text {
            continue;
        }

        match ingest_file(gatekeeper, anchors, path, chunk_size).await {
            Ok(chunks) => {
                summary.files_processed += 1;
                summary.chunks_stored += chunks;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "file skipped");
                summary.failures.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    info!(
        files = summary.files_processed,
        chunks = summary.chunks_stored,
        failed = summary.failures.len(),
        "ingestion complete"
    );
    Ok(summary)
}

async fn ingest_file(
    gatekeeper: &Gatekeeper,
    anchors: &AnchorStore,
    path: &Path,
    chunk_size: usize,
) -> Result<usize> {
    let raw_content =
        std::fs::read_to_string(path).map_err(|e| PrivacyError::IngestRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    // Sanitize BEFORE anything leaves the local zone.
    let outcome = gatekeeper.sanitize(&raw_content).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed");

    let chunks = chunk_text(&outcome.text, chunk_size);
    let mut stored = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        let nonce = Uuid::new_v4().simple().to_string();
        let chunk_id = format!("doc_{}_{}_{}", file_name, i, &nonce[..4]);
        anchors
            .store_document_chunk(
                &chunk_id,
                chunk,
                Some(json!({
                    "type": "document",
                    "source": file_name,
                    "chunk_index": i,
                })),
            )
            .await?;
        stored += 1;
    }

    Ok(stored)
}

/// Split text into chunks of roughly `target` chars, breaking on whitespace
/// so a sensitive token is never cut in half.
pub fn chunk_text(text: &str, target: usize) -> Vec<String> {
    let target = target.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > target {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{AnchorKind, Embedder};
    use crate::db::Database;
    use crate::extraction::{ExtractionOracle, ExtractionReport};
    use crate::vault::IdentityVault;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct NoPiiOracle;

    #[async_trait]
    impl ExtractionOracle for NoPiiOracle {
        async fn extract(&self, _text: &str) -> Result<ExtractionReport> {
            crate::extraction::parse_report(r#"{"entities": [], "semantic_summary": ""}"#)
        }
    }

    fn harness() -> (Gatekeeper, Arc<AnchorStore>) {
        let db = Database::open_in_memory().unwrap();
        let vault = IdentityVault::new(db.clone());
        let anchors = Arc::new(AnchorStore::new(db, Arc::new(StubEmbedder), 0.0));
        let gk = Gatekeeper::new(Arc::new(NoPiiOracle), vault, anchors.clone());
        (gk, anchors)
    }

    #[test]
    fn test_chunk_text_respects_word_boundaries() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = chunk_text(text, 12);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_chunk_text_keeps_long_words_whole() {
        let token = "PERSON_a1b2c3d4";
        let chunks = chunk_text(&format!("x {} y", token), 4);
        assert!(chunks.iter().any(|c| c.contains(token)));
    }

    #[tokio::test]
    async fn test_ingest_dir_stores_document_chunks() {
        let (gk, anchors) = harness();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("policy.txt"),
            "Transfers above the daily limit require manual review.",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.bin"), b"\x00\x01").unwrap();

        let summary = ingest_dir(&gk, &anchors, dir.path(), 500).await.unwrap();
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.chunks_stored, 1);
        assert!(summary.failures.is_empty());

        let hits = anchors
            .query_similar("daily limit", 5, Some(AnchorKind::Document))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].id.starts_with("doc_policy.txt_0_"));
    }

    #[tokio::test]
    async fn test_ingest_dir_reports_unreadable_files() {
        let (gk, anchors) = harness();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("good.md"), "plain notes").unwrap();

        let summary = ingest_dir(&gk, &anchors, dir.path(), 500).await.unwrap();
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.failures.len(), 1);
    }
}
