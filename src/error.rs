/// Error types for the review engine
///
/// None of these are fatal to the process. Persistence errors are logged
/// and the in-memory state stays authoritative; content and purge errors
/// are surfaced so the user can skip or retry.

use thiserror::Error;

use crate::state::data::AssetId;

/// Result type for review engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The decision file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Image decode/encode failed while building a preview
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Content for an item could not be loaded
    #[error("Failed to load {id}: {reason}")]
    ContentLoad { id: AssetId, reason: String },

    /// The asset source did not confirm a destructive removal
    #[error("Purge failed: {0}")]
    Purge(String),

    /// Any other asset source failure
    #[error("Asset source error: {0}")]
    Source(String),

    /// The session task has already shut down
    #[error("Review session is closed")]
    SessionClosed,
}

impl Error {
    /// True for failures to durably save or load the decision file
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Serialization(_))
    }
}
