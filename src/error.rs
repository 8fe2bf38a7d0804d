//! Error taxonomy for cache and sync operations.
//!
//! Every remote, extraction, and store failure surfaces as a [`CacheError`]
//! and propagates to the caller of the operation. Nothing is retried here;
//! the only retry loop in the crate lives in the embeddings client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Missing credentials or invalid settings. Fatal to remote operations.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any remote call failure: authentication, listing, download, embeddings.
    #[error("transport error: {0}")]
    Transport(String),

    /// A supported file failed to extract, or a source produced no text.
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("cache not found: {0}")]
    NotFound(String),

    /// A stored index written by a newer build.
    #[error("unsupported index format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid cache name: '{0}'")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        CacheError::Transport(e.to_string())
    }
}

impl CacheError {
    /// True for failures caused by the remote side or the network.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
