use crate::error::StorageError;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored URL record in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The short code derived from `original_url`.
    pub code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// The user or session that created the record. Fixed at creation.
    pub owner_id: String,
    /// Soft-delete flag. Only ever goes from `false` to `true`.
    pub deleted: bool,
}

impl UrlRecord {
    /// Creates a live record.
    pub fn new(
        code: ShortCode,
        original_url: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            code,
            original_url: original_url.into(),
            owner_id: owner_id.into(),
            deleted: false,
        }
    }

    /// Returns `true` if `other` binds the same code to the same URL and owner.
    ///
    /// Saving a record whose binding matches the stored one is an idempotent
    /// re-submission; any other collision on the code is a conflict.
    pub fn same_binding(&self, other: &UrlRecord) -> bool {
        self.code == other.code
            && self.original_url == other.original_url
            && self.owner_id == other.owner_id
    }
}

/// Result of a batch save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Number of records that were newly stored.
    pub inserted: usize,
    /// Codes that were skipped because they are bound to other content or another owner.
    pub conflicts: Vec<ShortCode>,
}

impl BatchOutcome {
    /// Returns `true` if no record of the batch conflicted.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// A read-only view of a repository.
///
/// This trait provides only the read operations from [`Repository`],
/// allowing redirect lookups to hold read-only access.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the record for a given short code.
    ///
    /// Soft-deleted records are returned with `deleted == true`; it is up to
    /// the caller to treat them as gone. Returns `None` if the code does not exist.
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Returns every live (not deleted) record created by `owner_id`.
    ///
    /// Order is not significant.
    async fn owner_records(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Stores a new record.
    ///
    /// Returns `Ok(())` if the code is new, or if it is already bound to the
    /// same URL and owner. Returns `Err(Conflict)` if the code is bound to a
    /// different URL or owner; the stored record is left untouched.
    async fn save(&self, record: UrlRecord) -> Result<()>;

    /// Stores many records as one unit.
    ///
    /// Conflicting records are skipped and reported in the outcome instead
    /// of failing the call. Transactional backends roll the whole batch back
    /// on any other error.
    async fn save_batch(&self, records: Vec<UrlRecord>) -> Result<BatchOutcome>;

    /// Marks every code in `codes` owned by `owner_id` as deleted.
    ///
    /// Codes that do not exist, belong to another owner or are already
    /// deleted are skipped silently. Returns the number of records that were
    /// newly marked deleted.
    async fn delete_owner_records(&self, owner_id: &str, codes: &[ShortCode]) -> Result<usize>;

    /// Rebuilds in-process state from durable storage.
    ///
    /// Called once at startup. Backends without derived state keep the default no-op.
    async fn recover(&self) -> Result<()> {
        Ok(())
    }
}
