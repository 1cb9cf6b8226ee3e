// Semantic Anchor Store — retrievable, non-identifying context per token.
//
// The remote side may read anchors; it must never be able to reverse them.
// Identity-kind writes therefore run a literal content scan against the raw
// values they were derived from, and refuse to store on a hit.

use rusqlite::params;
use serde_json::Value;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{PrivacyError, Result};
use crate::vault::IdentityVault;

pub mod embedding;

pub use embedding::{Embedder, OllamaEmbedder};

use embedding::cosine_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorKind {
    /// Semantic context for a vaulted entity (`PERSON_x` -> "female patient...").
    Identity,
    /// A sanitized document chunk stored for retrieval.
    Document,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Identity => "identity",
            AnchorKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identity" => Some(AnchorKind::Identity),
            "document" => Some(AnchorKind::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnchorRecord {
    pub token: String,
    pub kind: AnchorKind,
    pub semantic_text: String,
    pub metadata: Option<Value>,
    pub updated_at: String,
}

/// One similarity hit, ordered by descending score.
#[derive(Debug, Clone)]
pub struct AnchorMatch {
    pub id: String,
    pub score: f32,
    pub content: String,
}

pub struct AnchorStore {
    db: Database,
    embedder: std::sync::Arc<dyn Embedder>,
    similarity_threshold: f32,
}

impl AnchorStore {
    pub fn new(
        db: Database,
        embedder: std::sync::Arc<dyn Embedder>,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            db,
            embedder,
            similarity_threshold,
        }
    }

    /// Upsert the semantic anchor for an identity token.
    ///
    /// `forbidden_literals` are the raw values this anchor was derived from;
    /// if any of them appear in the text or metadata the write is rejected
    /// with [`PrivacyError::AnchorLeak`]. Upsert by token is idempotent and
    /// safe to retry.
    pub async fn store_anchor(
        &self,
        token: &str,
        semantic_text: &str,
        metadata: Option<Value>,
        forbidden_literals: &[String],
    ) -> Result<()> {
        ensure_no_leak(token, semantic_text, metadata.as_ref(), forbidden_literals)?;
        self.upsert(token, AnchorKind::Identity, semantic_text, metadata)
            .await?;
        info!(token = %token, "semantic anchor stored");
        Ok(())
    }

    /// Upsert a sanitized document chunk for retrieval. The caller is
    /// responsible for having sanitized the text through the gatekeeper.
    pub async fn store_document_chunk(
        &self,
        chunk_id: &str,
        clean_text: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.upsert(chunk_id, AnchorKind::Document, clean_text, metadata)
            .await
    }

    /// Exact lookup of an anchor by its token/id. No side effects.
    pub fn fetch_anchor(&self, token: &str) -> Result<Option<AnchorRecord>> {
        let guard = self.db.lock()?;
        let mut stmt = guard.prepare(
            "SELECT token, kind, semantic_text, metadata_json, updated_at
             FROM anchors WHERE token = ?1",
        )?;
        let mut rows = stmt.query([token])?;
        match rows.next()? {
            Some(row) => {
                let kind_str: String = row.get(1)?;
                let metadata_json: Option<String> = row.get(3)?;
                Ok(Some(AnchorRecord {
                    token: row.get(0)?,
                    kind: AnchorKind::parse(&kind_str).unwrap_or(AnchorKind::Identity),
                    semantic_text: row.get(2)?,
                    metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
                    updated_at: row.get(4)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Similarity search over stored anchors, optionally restricted to one
    /// kind. Returns matches above the configured threshold, best first.
    pub async fn query_similar(
        &self,
        text: &str,
        top_k: usize,
        kind: Option<AnchorKind>,
    ) -> Result<Vec<AnchorMatch>> {
        let query_vector = self.embedder.embed(text).await?;

        let candidates: Vec<(String, String, String)> = {
            let guard = self.db.lock()?;
            let (sql, kind_param) = match kind {
                Some(k) => (
                    "SELECT token, semantic_text, embedding_json FROM anchors WHERE kind = ?1",
                    Some(k.as_str()),
                ),
                None => (
                    "SELECT token, semantic_text, embedding_json FROM anchors",
                    None,
                ),
            };
            let mut stmt = guard.prepare(sql)?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String)> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            };
            let rows = match kind_param {
                Some(k) => stmt.query_map([k], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt.query_map([], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
            };
            rows
        };

        let mut matches: Vec<AnchorMatch> = candidates
            .into_iter()
            .filter_map(|(id, content, embedding_json)| {
                let stored: Vec<f32> = serde_json::from_str(&embedding_json).ok()?;
                let score = cosine_similarity(&query_vector, &stored);
                if score > self.similarity_threshold {
                    Some(AnchorMatch { id, score, content })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    pub fn delete_anchor(&self, token: &str) -> Result<bool> {
        let guard = self.db.lock()?;
        let n = guard.execute("DELETE FROM anchors WHERE token = ?1", params![token])?;
        Ok(n > 0)
    }

    /// Drop identity anchors whose token no longer has a vault record.
    /// Orphans are non-reversible and harmless, but there is no reason to
    /// keep serving them. Local-zone maintenance only. Returns the number
    /// of anchors removed.
    pub fn gc_orphans(&self, vault: &IdentityVault) -> Result<usize> {
        let orphans: Vec<String> = {
            let guard = self.db.lock()?;
            let mut stmt =
                guard.prepare("SELECT token FROM anchors WHERE kind = 'identity'")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut removed = 0;
        for token in orphans {
            if vault.resolve(&token)?.is_none() {
                if self.delete_anchor(&token)? {
                    debug!(token = %token, "orphaned anchor collected");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn upsert(
        &self,
        token: &str,
        kind: AnchorKind,
        semantic_text: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let vector = self.embedder.embed(semantic_text).await?;
        let embedding_json = serde_json::to_string(&vector)
            .map_err(|e| PrivacyError::StorageUnavailable(e.to_string()))?;
        let metadata_json = metadata.map(|m| m.to_string());

        let guard = self.db.lock()?;
        guard.execute(
            "INSERT INTO anchors (token, kind, semantic_text, embedding_json, metadata_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(token) DO UPDATE SET
                 kind = excluded.kind,
                 semantic_text = excluded.semantic_text,
                 embedding_json = excluded.embedding_json,
                 metadata_json = excluded.metadata_json,
                 updated_at = datetime('now')",
            params![token, kind.as_str(), semantic_text, embedding_json, metadata_json],
        )?;
        Ok(())
    }
}

/// Content-scan invariant: the anchor must not carry the original value.
/// Case-insensitive, because a summary like "sarah is mid-40s" leaks just
/// as much as the capitalized form.
fn ensure_no_leak(
    token: &str,
    semantic_text: &str,
    metadata: Option<&Value>,
    forbidden_literals: &[String],
) -> Result<()> {
    let mut haystack = semantic_text.to_lowercase();
    if let Some(m) = metadata {
        haystack.push('\n');
        haystack.push_str(&m.to_string().to_lowercase());
    }

    for literal in forbidden_literals {
        let needle = literal.to_lowercase();
        if !needle.is_empty() && haystack.contains(&needle) {
            return Err(PrivacyError::AnchorLeak {
                token: token.to_string(),
            });
        }
    }
    Ok(())
}
