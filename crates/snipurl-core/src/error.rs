use crate::shortcode::ShortCode;
use crate::shortener::BatchEntry;
use thiserror::Error;

/// Errors reported by a storage backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The code is already bound to a different URL or a different owner.
    ///
    /// Carries the code so the caller can still hand out the existing short URL.
    #[error("short code already taken: {0}")]
    Conflict(ShortCode),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    /// Returns `true` if this error is a short code conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// Errors returned by the shortener service and the deletion pipeline.
#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("batch must contain at least one url")]
    EmptyBatch,
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    /// The URL was already shortened; `short_url` is the existing short URL.
    #[error("url already shortened: {short_url}")]
    Conflict { short_url: String },
    /// Some batch items were already shortened.
    ///
    /// `entries` holds every computed short URL in input order, including the
    /// conflicting ones.
    #[error("{} of {} batch urls already shortened", .conflicts.len(), .entries.len())]
    BatchConflict {
        entries: Vec<BatchEntry>,
        conflicts: Vec<ShortCode>,
    },
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deletion pipeline failed: {0}")]
    Pipeline(String),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}
