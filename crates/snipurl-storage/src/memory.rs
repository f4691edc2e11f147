use crate::index::{Admission, RecordIndex};
use async_trait::async_trait;
use parking_lot::RwLock;
use snipurl_core::repository::{BatchOutcome, ReadRepository, Repository, Result, UrlRecord};
use snipurl_core::{ShortCode, StorageError};
use tracing::{debug, trace, warn};

/// In-memory implementation of the repository contract.
///
/// Both lookup maps live behind a single reader/writer lock, so readers run
/// concurrently with each other but never with a writer. Records are copied
/// out on every read. Nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    index: RwLock<RecordIndex>,
}

impl InMemoryRepository {
    /// Creates a new, empty in-memory repository.
    pub fn new() -> Self {
        Self {
            index: RwLock::new(RecordIndex::new()),
        }
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "looking up short code");
        Ok(self.index.read().get(code))
    }

    async fn owner_records(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.index.read().owner_records(owner_id))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save(&self, record: UrlRecord) -> Result<()> {
        let code = record.code.clone();

        match self.index.write().insert(record) {
            Admission::New => {
                debug!(code = %code, "stored record");
                Ok(())
            }
            Admission::Duplicate => {
                trace!(code = %code, "record already stored");
                Ok(())
            }
            Admission::Conflict => {
                warn!(code = %code, "short code already bound to other content");
                Err(StorageError::Conflict(code))
            }
        }
    }

    async fn save_batch(&self, records: Vec<UrlRecord>) -> Result<BatchOutcome> {
        let mut index = self.index.write();
        let plan = index.plan_batch(records);
        let inserted = plan.accepted.len();

        for record in plan.accepted {
            index.insert(record);
        }

        debug!(inserted, conflicts = plan.conflicts.len(), "stored batch");
        Ok(BatchOutcome {
            inserted,
            conflicts: plan.conflicts,
        })
    }

    async fn delete_owner_records(&self, owner_id: &str, codes: &[ShortCode]) -> Result<usize> {
        let mut index = self.index.write();
        let positions = index.deletable(owner_id, codes);
        index.mark_deleted(&positions);

        debug!(
            owner_id,
            requested = codes.len(),
            deleted = positions.len(),
            "soft-deleted owner records"
        );
        Ok(positions.len())
    }
}
