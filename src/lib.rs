// Veilgate - a one-way privacy boundary for LLM-bound text.
//
// Real identifying values stay in a local vault; the untrusted zone only
// ever sees opaque tokens plus non-identifying semantic anchors. Text coming
// back from that zone is scanned for tokens and restored to real values.

pub mod anchor;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod gatekeeper;
pub mod ingest;
pub mod restore;
pub mod token;
pub mod vault;

// Re-export the surface most hosts need
pub use anchor::{AnchorKind, AnchorMatch, AnchorRecord, AnchorStore, Embedder, OllamaEmbedder};
pub use config::Config;
pub use db::Database;
pub use error::{PrivacyError, Result};
pub use extraction::{ExtractedEntity, ExtractionOracle, ExtractionReport, OllamaExtractor};
pub use gatekeeper::{Gatekeeper, SanitizeOutcome};
pub use ingest::{ingest_dir, IngestSummary};
pub use restore::{RestorationBridge, RestorationReport};
pub use vault::{IdentityVault, PseudonymRecord};
