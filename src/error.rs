// Error taxonomy for the privacy boundary.
//
// Sanitization fails closed: an extraction or vault failure aborts the whole
// request. Anchor-store failures only degrade remote reasoning quality, so
// callers catch `RemoteUnavailable` and continue with the tokenized text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrivacyError {
    /// The extraction oracle was unreachable or returned output that does
    /// not parse into the expected schema.
    #[error("extraction oracle failed: {0}")]
    ExtractionFailure(String),

    /// The local vault storage could not be read or written.
    #[error("identity vault unavailable: {0}")]
    StorageUnavailable(String),

    /// The anchor store or embedding service could not be reached.
    #[error("anchor store unavailable: {0}")]
    RemoteUnavailable(String),

    /// An anchor write was rejected because its text would have carried the
    /// vaulted original value across the boundary.
    #[error("anchor for {token} contains the original value; refusing to store")]
    AnchorLeak { token: String },

    /// A document could not be read during batch ingestion.
    #[error("failed to read {path}: {reason}")]
    IngestRead { path: String, reason: String },
}

impl From<rusqlite::Error> for PrivacyError {
    fn from(e: rusqlite::Error) -> Self {
        PrivacyError::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrivacyError>;
