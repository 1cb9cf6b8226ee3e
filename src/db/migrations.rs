// Database migrations

use rusqlite::{Connection, Result};

pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table to track version
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = get_current_version(conn)?;

    if current_version < 1 {
        migration_001_pseudonym_vault(conn)?;
        set_version(conn, 1)?;
    }

    if current_version < 2 {
        migration_002_semantic_anchors(conn)?;
        set_version(conn, 2)?;
    }

    Ok(())
}

fn get_current_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

fn migration_001_pseudonym_vault(conn: &Connection) -> Result<()> {
    // token:          the opaque id sent across the boundary (PERSON_a1b2c3d4)
    // original_value: the sensitive value; never leaves this table
    // entity_type:    the category (PERSON, EMAIL, ...)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pseudonyms (
            token TEXT PRIMARY KEY,
            original_value TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(original_value, entity_type)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pseudonyms_value ON pseudonyms(original_value, entity_type)",
        [],
    )?;

    Ok(())
}

fn migration_002_semantic_anchors(conn: &Connection) -> Result<()> {
    // Anchors hold non-identifying context only. An anchor whose token has no
    // vault row is orphaned and harmless; see AnchorStore::gc_orphans.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS anchors (
            token TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            semantic_text TEXT NOT NULL,
            embedding_json TEXT NOT NULL,
            metadata_json TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_anchors_kind ON anchors(kind)",
        [],
    )?;

    Ok(())
}
