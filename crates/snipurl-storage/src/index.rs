use snipurl_core::{ShortCode, UrlRecord};
use std::collections::{HashMap, HashSet};

/// How the index treats a record offered for insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The code is unknown; the record becomes a new entry.
    New,
    /// The code is already bound to the same URL and owner.
    Duplicate,
    /// The code is bound to a different URL or owner.
    Conflict,
}

/// A batch split into the records to store and the codes to report.
#[derive(Debug, Default)]
pub(crate) struct BatchPlan {
    pub accepted: Vec<UrlRecord>,
    pub conflicts: Vec<ShortCode>,
}

/// In-process record index shared by the memory and file backends.
///
/// Records are kept in insertion order, which is also the order the file
/// backend writes them back to disk. Two lookup maps point into that list:
/// code to position and owner to positions. The index is not synchronized;
/// owners wrap it in their own lock.
#[derive(Debug, Default)]
pub(crate) struct RecordIndex {
    records: Vec<UrlRecord>,
    by_code: HashMap<ShortCode, usize>,
    by_owner: HashMap<String, Vec<usize>>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// All records in insertion order, deleted ones included.
    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    pub fn admission(&self, record: &UrlRecord) -> Admission {
        match self.by_code.get(&record.code) {
            None => Admission::New,
            Some(&pos) if self.records[pos].same_binding(record) => Admission::Duplicate,
            Some(_) => Admission::Conflict,
        }
    }

    /// Inserts the record if its code is unknown.
    pub fn insert(&mut self, record: UrlRecord) -> Admission {
        let admission = self.admission(&record);
        if admission == Admission::New {
            self.push(record);
        }
        admission
    }

    /// Decides which records of a batch are new, without touching the index.
    ///
    /// Repeats inside the batch are checked against the earlier entry, so an
    /// identical repeat is dropped and a different binding is a conflict.
    pub fn plan_batch(&self, records: Vec<UrlRecord>) -> BatchPlan {
        let mut plan = BatchPlan::default();
        let mut pending: HashMap<ShortCode, usize> = HashMap::new();

        for record in records {
            match self.admission(&record) {
                Admission::Duplicate => continue,
                Admission::Conflict => {
                    plan.conflicts.push(record.code);
                    continue;
                }
                Admission::New => {}
            }

            match pending.get(&record.code) {
                Some(&pos) if plan.accepted[pos].same_binding(&record) => {}
                Some(_) => plan.conflicts.push(record.code),
                None => {
                    pending.insert(record.code.clone(), plan.accepted.len());
                    plan.accepted.push(record);
                }
            }
        }

        plan
    }

    pub fn get(&self, code: &ShortCode) -> Option<UrlRecord> {
        self.by_code.get(code).map(|&pos| self.records[pos].clone())
    }

    /// Live records of an owner, copied out of the index.
    pub fn owner_records(&self, owner_id: &str) -> Vec<UrlRecord> {
        self.by_owner
            .get(owner_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| &self.records[pos])
                    .filter(|record| !record.deleted)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Positions of the live records among `codes` that belong to `owner_id`.
    pub fn deletable(&self, owner_id: &str, codes: &[ShortCode]) -> Vec<usize> {
        let mut seen = HashSet::new();
        codes
            .iter()
            .filter_map(|code| self.by_code.get(code).copied())
            .filter(|&pos| {
                let record = &self.records[pos];
                record.owner_id == owner_id && !record.deleted
            })
            .filter(|pos| seen.insert(*pos))
            .collect()
    }

    pub fn mark_deleted(&mut self, positions: &[usize]) {
        for &pos in positions {
            self.records[pos].deleted = true;
        }
    }

    /// Applies a record read back from durable storage.
    ///
    /// A repeated code with the same binding only merges the deleted flag;
    /// a repeated code with a different binding is returned as an error.
    pub fn replay(&mut self, record: UrlRecord) -> Result<(), UrlRecord> {
        match self.by_code.get(&record.code) {
            None => {
                self.push(record);
                Ok(())
            }
            Some(&pos) if self.records[pos].same_binding(&record) => {
                self.records[pos].deleted |= record.deleted;
                Ok(())
            }
            Some(_) => Err(record),
        }
    }

    fn push(&mut self, record: UrlRecord) {
        let pos = self.records.len();
        self.by_code.insert(record.code.clone(), pos);
        self.by_owner
            .entry(record.owner_id.clone())
            .or_default()
            .push(pos);
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, url: &str, owner: &str) -> UrlRecord {
        UrlRecord::new(ShortCode::new_unchecked(code), url, owner)
    }

    #[test]
    fn insert_reports_admission() {
        let mut index = RecordIndex::new();

        assert_eq!(index.insert(record("aaa111", "https://a", "u1")), Admission::New);
        assert_eq!(
            index.insert(record("aaa111", "https://a", "u1")),
            Admission::Duplicate
        );
        assert_eq!(
            index.insert(record("aaa111", "https://b", "u1")),
            Admission::Conflict
        );
        assert_eq!(
            index.insert(record("aaa111", "https://a", "u2")),
            Admission::Conflict
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn plan_batch_handles_repeats_inside_the_batch() {
        let mut index = RecordIndex::new();
        index.insert(record("taken1", "https://taken", "u1"));

        let plan = index.plan_batch(vec![
            record("new111", "https://new", "u1"),
            record("new111", "https://new", "u1"),
            record("new111", "https://clash", "u1"),
            record("taken1", "https://taken", "u1"),
            record("taken1", "https://other", "u1"),
        ]);

        assert_eq!(plan.accepted.len(), 1);
        assert_eq!(plan.accepted[0].original_url, "https://new");
        assert_eq!(
            plan.conflicts,
            vec![
                ShortCode::new_unchecked("new111"),
                ShortCode::new_unchecked("taken1")
            ]
        );
        // planning leaves the index untouched
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn deletable_is_owner_scoped_and_deduplicated() {
        let mut index = RecordIndex::new();
        index.insert(record("mine11", "https://a", "u1"));
        index.insert(record("yours1", "https://b", "u2"));

        let codes = [
            ShortCode::new_unchecked("mine11"),
            ShortCode::new_unchecked("mine11"),
            ShortCode::new_unchecked("yours1"),
            ShortCode::new_unchecked("absent"),
        ];
        let positions = index.deletable("u1", &codes);
        assert_eq!(positions, vec![0]);

        index.mark_deleted(&positions);
        assert!(index.deletable("u1", &codes).is_empty());
        assert!(index.owner_records("u1").is_empty());
        assert_eq!(index.owner_records("u2").len(), 1);
    }

    #[test]
    fn replay_merges_deleted_flag_and_rejects_rebinding() {
        let mut index = RecordIndex::new();
        index.replay(record("abc123", "https://a", "u1")).unwrap();

        let mut deleted = record("abc123", "https://a", "u1");
        deleted.deleted = true;
        index.replay(deleted).unwrap();
        assert!(index.get(&ShortCode::new_unchecked("abc123")).unwrap().deleted);

        // deleted never flips back
        index.replay(record("abc123", "https://a", "u1")).unwrap();
        assert!(index.get(&ShortCode::new_unchecked("abc123")).unwrap().deleted);

        assert!(index.replay(record("abc123", "https://b", "u1")).is_err());
    }
}
