// Identity Vault — local, reversible token <-> value mapping.
//
// CRITICAL: this table must never act as a source for the remote side.
// Only the gatekeeper (sanitize) and the restoration bridge (restore) read it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rusqlite::{params, ErrorCode};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{PrivacyError, Result};
use crate::token;

/// One vaulted value. Immutable once written; removed only via [`IdentityVault::delete`].
#[derive(Debug, Clone)]
pub struct PseudonymRecord {
    pub token: String,
    pub original_value: String,
    pub entity_type: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct IdentityVault {
    db: Database,
}

impl IdentityVault {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the stable token for `(original_value, entity_type)`, minting
    /// and persisting one on first sighting.
    ///
    /// Atomic under concurrent callers: the whole find-or-create runs inside
    /// the connection mutex, and the `UNIQUE(original_value, entity_type)`
    /// constraint backs it up. A token primary-key collision is retried with
    /// a fresh suffix and never surfaces to the caller.
    pub fn get_or_create_token(&self, original_value: &str, entity_type: &str) -> Result<String> {
        let entity_type = token::normalize_entity_type(entity_type);
        let guard = self.db.lock()?;

        if let Some(existing) = lookup_token(&guard, original_value, &entity_type)? {
            debug!(entity_type = %entity_type, "existing mapping reused");
            return Ok(existing);
        }

        // Suffix space is 16^8; more than a couple of rounds means something
        // is broken, not unlucky.
        const MAX_MINT_ATTEMPTS: usize = 8;

        for _ in 0..MAX_MINT_ATTEMPTS {
            let candidate = token::mint(&entity_type);
            let inserted = guard.execute(
                "INSERT INTO pseudonyms (token, original_value, entity_type)
                 VALUES (?1, ?2, ?3)",
                params![candidate, original_value, entity_type],
            );

            match inserted {
                Ok(_) => {
                    debug!(token = %candidate, entity_type = %entity_type, "new mapping created");
                    return Ok(candidate);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    // Either the value row appeared concurrently (return it)
                    // or the minted token collided (retry with a new suffix).
                    if let Some(existing) = lookup_token(&guard, original_value, &entity_type)? {
                        return Ok(existing);
                    }
                    warn!("token suffix collision, reminting");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PrivacyError::StorageUnavailable(
            "could not mint a unique token".to_string(),
        ))
    }

    /// Exact lookup by fully-qualified token. No side effects.
    pub fn resolve(&self, tok: &str) -> Result<Option<PseudonymRecord>> {
        let guard = self.db.lock()?;
        fetch_record(
            &guard,
            "SELECT token, original_value, entity_type, created_at
             FROM pseudonyms WHERE token = ?1",
            tok,
        )
    }

    /// Lookup that tolerates the formatting drift observed in returned text:
    /// tries the candidate verbatim, then toggles the entity-type prefix.
    ///
    /// A bare suffix is matched against the tail of stored tokens. If two
    /// tokens of different types share a suffix the bare form is ambiguous
    /// and resolves to nothing rather than guessing.
    pub fn resolve_flexible(&self, candidate: &str) -> Result<Option<PseudonymRecord>> {
        if let Some(found) = self.resolve(candidate)? {
            return Ok(Some(found));
        }

        let suffix = match token::split_qualified(candidate) {
            Some((_, suffix)) => suffix,
            None if token::is_hex8(candidate) => candidate,
            None => return Ok(None),
        };

        let guard = self.db.lock()?;
        let mut stmt = guard.prepare(
            "SELECT token, original_value, entity_type, created_at
             FROM pseudonyms WHERE substr(token, -8) = ?1",
        )?;
        let mut rows = stmt
            .query_map([suffix], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            n => {
                warn!(suffix = %suffix, matches = n, "ambiguous bare suffix, leaving unresolved");
                Ok(None)
            }
        }
    }

    /// Erasure path: drop the mapping. Returns whether a record existed.
    /// Subsequent `resolve` calls report no match.
    pub fn delete(&self, tok: &str) -> Result<bool> {
        let guard = self.db.lock()?;
        let n = guard.execute("DELETE FROM pseudonyms WHERE token = ?1", params![tok])?;
        Ok(n > 0)
    }

    pub fn record_count(&self) -> Result<usize> {
        let guard = self.db.lock()?;
        let n: i64 = guard.query_row("SELECT COUNT(*) FROM pseudonyms", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// True if the token (or its bare suffix) is registered.
    pub fn contains(&self, candidate: &str) -> Result<bool> {
        Ok(self.resolve_flexible(candidate)?.is_some())
    }
}

/// Short stable hash of a sensitive value, safe to put in log lines.
pub fn hash_for_logging(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    format!("v_{}", URL_SAFE_NO_PAD.encode(&digest[..8]))
}

fn lookup_token(
    conn: &rusqlite::Connection,
    original_value: &str,
    entity_type: &str,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT token FROM pseudonyms
         WHERE original_value = ?1 AND entity_type = ?2",
    )?;
    let mut rows = stmt.query(params![original_value, entity_type])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn fetch_record(
    conn: &rusqlite::Connection,
    sql: &str,
    key: &str,
) -> Result<Option<PseudonymRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(PseudonymRecord {
            token: row.get(0)?,
            original_value: row.get(1)?,
            entity_type: row.get(2)?,
            created_at: row.get(3)?,
        })),
        None => Ok(None),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PseudonymRecord> {
    Ok(PseudonymRecord {
        token: row.get(0)?,
        original_value: row.get(1)?,
        entity_type: row.get(2)?,
        created_at: row.get(3)?,
    })
}
