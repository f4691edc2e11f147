use crate::error::io_error;
use crate::index::{Admission, RecordIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snipurl_core::repository::{BatchOutcome, ReadRepository, Repository, Result, UrlRecord};
use snipurl_core::{ShortCode, StorageError};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

/// One line of the log file.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    /// Owner id. The field name is kept for compatibility with existing logs.
    uuid: String,
    short_url: String,
    original_url: String,
    #[serde(default)]
    is_deleted: bool,
}

impl From<&UrlRecord> for LogEntry {
    fn from(record: &UrlRecord) -> Self {
        Self {
            uuid: record.owner_id.clone(),
            short_url: record.code.to_string(),
            original_url: record.original_url.clone(),
            is_deleted: record.deleted,
        }
    }
}

impl LogEntry {
    fn into_record(self, line: usize) -> Result<UrlRecord> {
        if self.short_url.is_empty() || self.original_url.is_empty() {
            return Err(StorageError::InvalidData(format!(
                "line {line}: short_url or original_url is empty"
            )));
        }

        Ok(UrlRecord {
            code: ShortCode::new_unchecked(self.short_url),
            original_url: self.original_url,
            owner_id: self.uuid,
            deleted: self.is_deleted,
        })
    }
}

/// File-backed implementation of the repository contract.
///
/// Every stored record is appended to a newline-delimited JSON log, which is
/// the source of truth; the in-memory index is derived from it. New records
/// reach the file before the index. Deletes rewrite the whole log, so they
/// cost O(total records) and block other writers while they run.
///
/// Each mutation runs on its own task: once started it finishes even if the
/// caller's future is dropped, so the file and the index never disagree.
///
/// [`recover`](Repository::recover) must run before the repository serves
/// traffic; [`FileRepository::open`] does that for you.
#[derive(Debug)]
pub struct FileRepository {
    log: Arc<LogFile>,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    // Guards the index and every write to the file.
    index: RwLock<RecordIndex>,
}

impl FileRepository {
    /// Creates a repository for `path` without touching the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: Arc::new(LogFile {
                path: path.into(),
                index: RwLock::new(RecordIndex::new()),
            }),
        }
    }

    /// Creates the log (and its parent directories) if absent, then replays it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let repository = Self::new(path);
        repository.recover().await?;
        Ok(repository)
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.log.path
    }
}

/// Runs `mutation` to completion on a separate task.
async fn detached<T, F>(mutation: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|e| StorageError::Operation(format!("file log task failed: {e}")))?
}

impl LogFile {
    async fn ensure_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("create", &self.path, e))?;
        Ok(())
    }

    async fn append(&self, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let buf = encode(records.iter())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("open", &self.path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| io_error("stat", &self.path, e))?
            .len();

        if let Err(err) = write_synced(&mut file, &buf).await {
            // a partial entry would corrupt the line the next append starts
            if let Err(undo) = file.set_len(len).await {
                warn!(
                    path = %self.path.display(),
                    error = %undo,
                    "failed to drop partially appended entry"
                );
            }
            return Err(io_error("append to", &self.path, err));
        }
        Ok(())
    }

    /// Replaces the log with `records` via a temporary file and a rename.
    async fn rewrite(&self, records: &[UrlRecord]) -> Result<()> {
        let buf = encode(records.iter())?;
        let tmp_path = temp_path(&self.path);

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| io_error("create", &tmp_path, e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| io_error("write", &tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("sync", &tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, e))
    }

    /// Repairs a log whose last line has no newline and returns how many
    /// bytes of `contents` to replay.
    ///
    /// Only an interrupted append leaves such a line. If it still parses it
    /// just gets its newline; otherwise it is cut off.
    async fn repair_tail(&self, contents: &str) -> Result<usize> {
        if contents.is_empty() || contents.ends_with('\n') {
            return Ok(contents.len());
        }

        let start = contents.rfind('\n').map_or(0, |i| i + 1);
        let tail = &contents[start..];
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("open", &self.path, e))?;

        let kept = if serde_json::from_str::<LogEntry>(tail).is_ok() {
            file.write_all(b"\n")
                .await
                .map_err(|e| io_error("append to", &self.path, e))?;
            contents.len()
        } else {
            warn!(
                path = %self.path.display(),
                bytes = tail.len(),
                "dropping torn last line of file log"
            );
            file.set_len(start as u64)
                .await
                .map_err(|e| io_error("truncate", &self.path, e))?;
            start
        };

        file.sync_data()
            .await
            .map_err(|e| io_error("sync", &self.path, e))?;
        Ok(kept)
    }

    async fn save(&self, record: UrlRecord) -> Result<()> {
        let mut index = self.index.write().await;

        match index.admission(&record) {
            Admission::New => {}
            Admission::Duplicate => {
                trace!(code = %record.code, "record already stored");
                return Ok(());
            }
            Admission::Conflict => {
                warn!(code = %record.code, "short code already bound to other content");
                return Err(StorageError::Conflict(record.code));
            }
        }

        self.append(std::slice::from_ref(&record)).await?;
        debug!(code = %record.code, "appended record");
        index.insert(record);
        Ok(())
    }

    async fn save_batch(&self, records: Vec<UrlRecord>) -> Result<BatchOutcome> {
        let mut index = self.index.write().await;
        let plan = index.plan_batch(records);

        self.append(&plan.accepted).await?;

        let inserted = plan.accepted.len();
        for record in plan.accepted {
            index.insert(record);
        }

        debug!(inserted, conflicts = plan.conflicts.len(), "appended batch");
        Ok(BatchOutcome {
            inserted,
            conflicts: plan.conflicts,
        })
    }

    async fn delete_owner_records(&self, owner_id: &str, codes: &[ShortCode]) -> Result<usize> {
        let mut index = self.index.write().await;
        let positions = index.deletable(owner_id, codes);
        if positions.is_empty() {
            trace!(owner_id, requested = codes.len(), "nothing to delete");
            return Ok(0);
        }

        let mut snapshot = index.records().to_vec();
        for &pos in &positions {
            snapshot[pos].deleted = true;
        }
        self.rewrite(&snapshot).await?;
        index.mark_deleted(&positions);

        debug!(
            owner_id,
            requested = codes.len(),
            deleted = positions.len(),
            "rewrote log after soft delete"
        );
        Ok(positions.len())
    }

    async fn recover(&self) -> Result<()> {
        let mut index = self.index.write().await;
        self.ensure_file().await?;

        let contents = fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error("read", &self.path, e))?;
        let complete = self.repair_tail(&contents).await?;

        let mut replayed = RecordIndex::new();
        for (i, text) in contents[..complete].lines().enumerate() {
            let line = i + 1;
            if text.trim().is_empty() {
                continue;
            }

            let record = decode(line, text)?;
            replayed.replay(record).map_err(|record| {
                StorageError::InvalidData(format!(
                    "line {line}: short code {} is bound to more than one url or owner",
                    record.code
                ))
            })?;
        }

        info!(
            path = %self.path.display(),
            records = replayed.len(),
            "recovered file log"
        );
        *index = replayed;
        Ok(())
    }
}

async fn write_synced(file: &mut fs::File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.sync_data().await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn encode<'a>(records: impl Iterator<Item = &'a UrlRecord>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, &LogEntry::from(record))
            .map_err(|e| StorageError::Operation(format!("encode record {}: {e}", record.code)))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

fn decode(line: usize, text: &str) -> Result<UrlRecord> {
    let entry: LogEntry = serde_json::from_str(text)
        .map_err(|e| StorageError::InvalidData(format!("line {line}: {e}")))?;
    entry.into_record(line)
}

#[async_trait]
impl ReadRepository for FileRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "looking up short code");
        Ok(self.log.index.read().await.get(code))
    }

    async fn owner_records(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.log.index.read().await.owner_records(owner_id))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn save(&self, record: UrlRecord) -> Result<()> {
        let log = Arc::clone(&self.log);
        detached(async move { log.save(record).await }).await
    }

    async fn save_batch(&self, records: Vec<UrlRecord>) -> Result<BatchOutcome> {
        let log = Arc::clone(&self.log);
        detached(async move { log.save_batch(records).await }).await
    }

    async fn delete_owner_records(&self, owner_id: &str, codes: &[ShortCode]) -> Result<usize> {
        let log = Arc::clone(&self.log);
        let owner_id = owner_id.to_owned();
        let codes = codes.to_vec();
        detached(async move { log.delete_owner_records(&owner_id, &codes).await }).await
    }

    async fn recover(&self) -> Result<()> {
        let log = Arc::clone(&self.log);
        detached(async move { log.recover().await }).await
    }
}
