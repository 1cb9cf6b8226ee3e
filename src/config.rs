// Runtime configuration, resolved from environment variables with defaults
// that work against a stock local Ollama install.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file holding the pseudonym vault and the anchor tables.
    pub db_path: PathBuf,
    /// Base URL of the local Ollama server used for extraction and embeddings.
    pub ollama_base_url: String,
    /// Model used as the PII extraction oracle.
    pub extraction_model: String,
    /// Model used to embed semantic anchors.
    pub embedding_model: String,
    /// Minimum cosine score for a similarity match to be returned.
    pub similarity_threshold: f32,
    /// Timeout for the extraction call. A timeout here aborts sanitization.
    pub oracle_timeout: Duration,
    /// Timeout for embedding / anchor operations. A timeout here is non-fatal.
    pub anchor_timeout: Duration,
    /// Target chunk size (chars) for document ingestion.
    pub chunk_size: usize,
    /// Display-name stand-ins the remote side is known to emit next to a
    /// token instead of the token alone. Rewritten to the restored value
    /// after token restoration succeeds. Empty by default.
    pub placeholder_aliases: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ollama_base_url: "http://localhost:11434".to_string(),
            extraction_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            similarity_threshold: 0.3,
            oracle_timeout: Duration::from_secs(120),
            anchor_timeout: Duration::from_secs(30),
            chunk_size: 500,
            placeholder_aliases: Vec::new(),
        }
    }
}

impl Config {
    /// Build a config from `VEILGATE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(p) = std::env::var("VEILGATE_DB") {
            cfg.db_path = PathBuf::from(p);
        }
        if let Ok(u) = std::env::var("VEILGATE_OLLAMA_URL") {
            cfg.ollama_base_url = u;
        }
        if let Ok(m) = std::env::var("VEILGATE_EXTRACTION_MODEL") {
            cfg.extraction_model = m;
        }
        if let Ok(m) = std::env::var("VEILGATE_EMBEDDING_MODEL") {
            cfg.embedding_model = m;
        }
        if let Ok(t) = std::env::var("VEILGATE_SIMILARITY_THRESHOLD") {
            if let Ok(v) = t.parse::<f32>() {
                cfg.similarity_threshold = v;
            }
        }
        if let Ok(s) = std::env::var("VEILGATE_ORACLE_TIMEOUT_SECS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.oracle_timeout = Duration::from_secs(v);
            }
        }
        if let Ok(a) = std::env::var("VEILGATE_PLACEHOLDER_ALIASES") {
            cfg.placeholder_aliases = a
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        cfg
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("veilgate").join("veilgate.db"))
        .unwrap_or_else(|| PathBuf::from("veilgate.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.similarity_threshold > 0.0);
        assert!(cfg.chunk_size > 0);
        assert!(cfg.placeholder_aliases.is_empty());
    }
}
