//! Bulk soft-delete pipeline.
//!
//! A producer task feeds the requested codes into a bounded channel and a
//! consumer task groups them into fixed-size batches, each flushed to the
//! backend with one `delete_owner_records` call. The caller waits for the
//! consumer to drain, then stops and joins the producer.

use snipurl_core::{Repository, ShortCode, ShortenerError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

type Result<T> = std::result::Result<T, ShortenerError>;

/// Number of codes flushed to the backend per call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DeletionSettings {
    #[builder(default = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl DeletionSettings {
    /// Codes per backend call, never less than one.
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for DeletionSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Summary of a finished pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Codes handed to the pipeline.
    pub requested: usize,
    /// Backend calls made.
    pub batches: usize,
    /// Records newly marked deleted. Codes that are unknown, owned by
    /// someone else or already deleted are not counted.
    pub deleted: usize,
}

/// Soft-deletes codes for one owner in batches.
///
/// Every run can be stopped through its own token
/// ([`run_with_cancel`](Self::run_with_cancel)) or all at once through
/// [`shutdown`](Self::shutdown). A stopped run returns
/// [`ShortenerError::Cancelled`]; batches flushed before that stay deleted.
pub struct DeletionPipeline<R: ?Sized> {
    repository: Arc<R>,
    settings: DeletionSettings,
    shutdown: CancellationToken,
}

impl<R: Repository + ?Sized> DeletionPipeline<R> {
    pub fn new(repository: Arc<R>, settings: DeletionSettings) -> Self {
        Self {
            repository,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs the pipeline until every code has been flushed.
    pub async fn run(&self, owner_id: &str, codes: Vec<ShortCode>) -> Result<DeletionReport> {
        self.run_with_cancel(owner_id, codes, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but also stops when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        owner_id: &str,
        codes: Vec<ShortCode>,
        cancel: CancellationToken,
    ) -> Result<DeletionReport> {
        let requested = codes.len();
        if requested == 0 {
            return Ok(DeletionReport::default());
        }

        let stop = StopSignal {
            run: self.shutdown.child_token(),
            caller: cancel,
        };
        // stops both tasks if this future is dropped mid-run
        let guard = stop.run.clone().drop_guard();

        let (tx, rx) = mpsc::channel(requested);
        let producer = tokio::spawn(produce(codes, tx, stop.clone()));
        let consumer = tokio::spawn(consume(
            Arc::clone(&self.repository),
            owner_id.to_string(),
            rx,
            requested,
            self.settings.batch_size(),
            stop,
        ));

        let consumed = consumer.await;

        // the consumer is done; release the producer and wait for it
        drop(guard);
        let produced = producer.await;

        let report = consumed.map_err(task_failure)?.inspect_err(|err| {
            warn!(owner_id, error = %err, "deletion pipeline stopped");
        })?;
        produced.map_err(task_failure)?;

        info!(
            owner_id,
            requested = report.requested,
            batches = report.batches,
            deleted = report.deleted,
            "deletion pipeline finished"
        );
        Ok(report)
    }

    /// Stops every run of this pipeline, including future ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns the token behind [`shutdown`](Self::shutdown).
    ///
    /// Callers can use this to tie the pipeline to an external shutdown signal.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Fires when either the pipeline or the caller cancels the run.
#[derive(Clone)]
struct StopSignal {
    run: CancellationToken,
    caller: CancellationToken,
}

impl StopSignal {
    async fn stopped(&self) {
        tokio::select! {
            _ = self.run.cancelled() => {}
            _ = self.caller.cancelled() => {}
        }
    }
}

async fn produce(codes: Vec<ShortCode>, tx: mpsc::Sender<ShortCode>, stop: StopSignal) {
    for code in codes {
        tokio::select! {
            biased;
            _ = stop.stopped() => return,
            sent = tx.send(code) => {
                // the receiver is gone
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn consume<R: Repository + ?Sized>(
    repository: Arc<R>,
    owner_id: String,
    mut rx: mpsc::Receiver<ShortCode>,
    requested: usize,
    batch_size: usize,
    stop: StopSignal,
) -> Result<DeletionReport> {
    let mut report = DeletionReport {
        requested,
        ..DeletionReport::default()
    };
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.stopped() => return Err(ShortenerError::Cancelled),
            next = rx.recv() => next,
        };
        let Some(code) = next else {
            break;
        };

        batch.push(code);
        if batch.len() == batch_size {
            flush(&*repository, &owner_id, &mut batch, &mut report, &stop).await?;
        }
    }

    if !batch.is_empty() {
        flush(&*repository, &owner_id, &mut batch, &mut report, &stop).await?;
    }
    Ok(report)
}

async fn flush<R: Repository + ?Sized>(
    repository: &R,
    owner_id: &str,
    batch: &mut Vec<ShortCode>,
    report: &mut DeletionReport,
    stop: &StopSignal,
) -> Result<()> {
    // a dropped sql call rolls back; a started file mutation still completes
    let deleted = tokio::select! {
        biased;
        _ = stop.stopped() => return Err(ShortenerError::Cancelled),
        deleted = repository.delete_owner_records(owner_id, batch.as_slice()) => deleted?,
    };

    report.batches += 1;
    report.deleted += deleted;
    debug!(
        owner_id,
        batch = report.batches,
        size = batch.len(),
        deleted,
        "flushed deletion batch"
    );
    batch.clear();
    Ok(())
}

fn task_failure(err: JoinError) -> ShortenerError {
    ShortenerError::Pipeline(err.to_string())
}
