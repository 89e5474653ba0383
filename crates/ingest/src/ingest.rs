//! Ingest coordinator.
//!
//! One reader on the blocking pool turns feedstock sources into batches and
//! pushes them into a bounded channel, so a slow index throttles reading. A
//! pool of submitters shares the receiving end. Every batch ends up either
//! submitted or in [`IngestReport::failed_batches`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use connect_core::config::IngestConfig;
use connect_core::{ConnectError, FeedstockReader, Record};

use crate::backend::IndexBackend;
use crate::batcher::{BatchLimit, DocumentBatcher};
use crate::document::{format_document, IngestBatch};
use crate::error::{BackendError, IngestError};

/// Where feedstock comes from: a JSON-lines file or entries already in memory.
#[derive(Debug, Clone)]
pub enum FeedstockSource {
    Path(PathBuf),
    Records(Vec<Record>),
}

impl From<PathBuf> for FeedstockSource {
    fn from(path: PathBuf) -> Self {
        FeedstockSource::Path(path)
    }
}

impl From<&Path> for FeedstockSource {
    fn from(path: &Path) -> Self {
        FeedstockSource::Path(path.to_path_buf())
    }
}

impl From<Vec<Record>> for FeedstockSource {
    fn from(records: Vec<Record>) -> Self {
        FeedstockSource::Records(records)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Zero or negative means one batch per source.
    pub batch_size: i64,
    pub num_submitters: usize,
    pub queue_capacity: usize,
    /// Submit attempts per batch before it is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further one.
    pub retry_backoff: Duration,
    /// Dead-lettered batches are appended here as JSON lines.
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            num_submitters: 5,
            queue_capacity: 16,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            dead_letter_path: None,
        }
    }
}

impl IngestOptions {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            num_submitters: cfg.num_submitters,
            queue_capacity: cfg.queue_capacity,
            max_attempts: cfg.max_attempts,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            ..Self::default()
        }
    }
}

/// A batch that never made it into the index.
///
/// `attempts == 0` means it was never submitted: the run stopped (shutdown,
/// reader error, or no submitters left) while it was still queued.
#[derive(Debug, Clone, Serialize)]
pub struct FailedBatch {
    pub index: usize,
    pub size: usize,
    pub attempts: u32,
    pub error: String,
    pub batch: IngestBatch,
}

impl FailedBatch {
    fn unsent(batch: IngestBatch, reason: &str) -> Self {
        Self {
            index: batch.index,
            size: batch.len(),
            attempts: 0,
            error: format!("not submitted: {reason}"),
            batch,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub records_read: usize,
    /// Batches formed by the reader, whether or not they were submitted.
    pub batches_queued: usize,
    pub batches_submitted: usize,
    pub documents_ingested: u64,
    pub failed_batches: Vec<FailedBatch>,
    /// Shutdown was requested before the queue was drained.
    pub cancelled: bool,
    pub crashed_submitters: usize,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failed_batches.is_empty()
            && !self.cancelled
            && self.crashed_submitters == 0
            && self.abandoned() == 0
    }

    /// Batches lost with a crashed submitter: neither submitted nor recorded
    /// as failed.
    pub fn abandoned(&self) -> usize {
        self.batches_queued
            .saturating_sub(self.batches_submitted + self.failed_batches.len())
    }
}

#[derive(Debug, Default)]
struct ReaderOutcome {
    records_read: usize,
    batches_queued: usize,
    stopped_early: bool,
    /// Batches read but never handed to a submitter.
    unsent: Vec<IngestBatch>,
    error: Option<ConnectError>,
}

#[derive(Debug, Default)]
struct SubmitterStats {
    batches_submitted: usize,
    documents_ingested: u64,
    failed: Vec<FailedBatch>,
    stopped_early: bool,
}

pub struct Ingester {
    backend: Arc<dyn IndexBackend>,
    options: IngestOptions,
    shutdown: watch::Receiver<bool>,
}

impl Ingester {
    pub fn new(backend: Arc<dyn IndexBackend>, options: IngestOptions) -> Self {
        // Sender dropped immediately: the flag stays false forever.
        let (_, shutdown) = watch::channel(false);
        Self {
            backend,
            options,
            shutdown,
        }
    }

    /// Stop between batches once the flag flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Read every source and submit its batches.
    ///
    /// A reader failure still lets queued batches drain. Everything that was
    /// read but not ingested is in the report (and the dead-letter file)
    /// before [`IngestError::Reader`] is returned.
    pub async fn run<I, S>(self, sources: I) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<FeedstockSource>,
    {
        let sources: Vec<FeedstockSource> = sources.into_iter().map(Into::into).collect();
        let Ingester {
            backend,
            options,
            shutdown,
        } = self;

        let (batch_tx, batch_rx) = mpsc::channel::<IngestBatch>(options.queue_capacity.max(1));
        let batch_rx = Arc::new(Mutex::new(batch_rx));

        let submitters: Vec<JoinHandle<SubmitterStats>> = (0..options.num_submitters.max(1))
            .map(|id| {
                tokio::spawn(run_submitter(
                    id,
                    batch_rx.clone(),
                    backend.clone(),
                    options.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        debug!(backend = backend.name(), submitters = submitters.len(), "submitters started");

        let limit = BatchLimit::from_size(options.batch_size);
        let reader_shutdown = shutdown.clone();
        let reader =
            tokio::task::spawn_blocking(move || read_sources(sources, limit, batch_tx, reader_shutdown));

        let mut report = IngestReport::default();
        for (id, handle) in submitters.into_iter().enumerate() {
            match handle.await {
                Ok(stats) => {
                    report.batches_submitted += stats.batches_submitted;
                    report.documents_ingested += stats.documents_ingested;
                    report.failed_batches.extend(stats.failed);
                    report.cancelled |= stats.stopped_early;
                }
                Err(e) => {
                    error!(submitter = id, error = %e, "submitter crashed");
                    report.crashed_submitters += 1;
                }
            }
        }

        // No submitter is left. Closing the queue stops a reader still
        // sending, and whatever is buffered is kept for the report.
        let mut leftover = Vec::new();
        {
            let mut rx = batch_rx.lock().await;
            rx.close();
            while let Some(batch) = rx.recv().await {
                leftover.push(batch);
            }
        }

        let outcome = reader.await.map_err(|e| IngestError::Task(e.to_string()))?;
        report.records_read = outcome.records_read;
        report.batches_queued = outcome.batches_queued + outcome.unsent.len();
        report.cancelled |= outcome.stopped_early && *shutdown.borrow();

        let reason = match &outcome.error {
            Some(e) => format!("feedstock read failed: {e}"),
            None if *shutdown.borrow() => "shutdown requested".to_string(),
            None => "no submitters left".to_string(),
        };
        if !leftover.is_empty() || !outcome.unsent.is_empty() {
            warn!(
                queued = leftover.len(),
                unsent = outcome.unsent.len(),
                reason = %reason,
                "batches left unsubmitted"
            );
        }
        report.failed_batches.extend(
            leftover
                .into_iter()
                .chain(outcome.unsent)
                .map(|batch| FailedBatch::unsent(batch, &reason)),
        );
        report.failed_batches.sort_by_key(|f| f.index);

        if let Some(path) = &options.dead_letter_path {
            write_dead_letters(path, &report.failed_batches).await?;
        }

        info!(
            backend = backend.name(),
            records = report.records_read,
            batches = report.batches_queued,
            submitted = report.batches_submitted,
            documents = report.documents_ingested,
            failed = report.failed_batches.len(),
            cancelled = report.cancelled,
            "ingest complete"
        );

        match outcome.error {
            Some(source) => Err(IngestError::Reader {
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }
}

/// Ingest `sources` with default options and the given batch size.
pub async fn ingest<I, S>(
    backend: Arc<dyn IndexBackend>,
    sources: I,
    batch_size: i64,
) -> Result<IngestReport, IngestError>
where
    I: IntoIterator<Item = S>,
    S: Into<FeedstockSource>,
{
    let options = IngestOptions {
        batch_size,
        ..IngestOptions::default()
    };
    Ingester::new(backend, options).run(sources).await
}

/// Reader side. A partial batch is flushed at the end of every source; on
/// early stop or error the pending tail comes back in `unsent`.
fn read_sources(
    sources: Vec<FeedstockSource>,
    limit: BatchLimit,
    tx: mpsc::Sender<IngestBatch>,
    shutdown: watch::Receiver<bool>,
) -> ReaderOutcome {
    let mut outcome = ReaderOutcome::default();
    let mut batcher = DocumentBatcher::new(limit);

    if let Err(e) = feed_batches(sources, &mut batcher, &tx, &shutdown, &mut outcome) {
        error!(error = %e, "feedstock read failed, draining queued batches");
        outcome.error = Some(e);
    }
    if let Some(batch) = batcher.flush() {
        outcome.unsent.push(batch);
    }
    outcome
}

fn feed_batches(
    sources: Vec<FeedstockSource>,
    batcher: &mut DocumentBatcher,
    tx: &mpsc::Sender<IngestBatch>,
    shutdown: &watch::Receiver<bool>,
    outcome: &mut ReaderOutcome,
) -> Result<(), ConnectError> {
    for source in sources {
        let entries: Box<dyn Iterator<Item = Result<Record, ConnectError>>> = match source {
            FeedstockSource::Path(path) => {
                debug!(path = %path.display(), "reading feedstock");
                Box::new(FeedstockReader::open(&path)?)
            }
            FeedstockSource::Records(records) => Box::new(records.into_iter().map(Ok)),
        };

        for entry in entries {
            let entry = entry?;
            outcome.records_read += 1;
            if let Some(batch) = batcher.push(format_document(entry)) {
                if !queue_batch(batch, tx, shutdown, outcome) {
                    return Ok(());
                }
            }
        }
        if let Some(batch) = batcher.flush() {
            if !queue_batch(batch, tx, shutdown, outcome) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Hand a batch to the submitters. Returns `false` when reading should stop.
fn queue_batch(
    batch: IngestBatch,
    tx: &mpsc::Sender<IngestBatch>,
    shutdown: &watch::Receiver<bool>,
    outcome: &mut ReaderOutcome,
) -> bool {
    if *shutdown.borrow() {
        outcome.stopped_early = true;
        outcome.unsent.push(batch);
        return false;
    }
    debug!(batch = batch.index, size = batch.len(), "queueing batch");
    match tx.blocking_send(batch) {
        Ok(()) => {
            outcome.batches_queued += 1;
            true
        }
        Err(mpsc::error::SendError(batch)) => {
            warn!(batch = batch.index, "no submitters left, reader stopping");
            outcome.stopped_early = true;
            outcome.unsent.push(batch);
            false
        }
    }
}

async fn run_submitter(
    id: usize,
    input: Arc<Mutex<mpsc::Receiver<IngestBatch>>>,
    backend: Arc<dyn IndexBackend>,
    options: IngestOptions,
    mut shutdown: watch::Receiver<bool>,
) -> SubmitterStats {
    let mut stats = SubmitterStats::default();
    // Turns false once every shutdown sender is gone.
    let mut watching = true;
    loop {
        if *shutdown.borrow() {
            debug!(submitter = id, "shutdown requested");
            stats.stopped_early = true;
            break;
        }
        let next = tokio::select! {
            biased;
            changed = shutdown.changed(), if watching => {
                watching = changed.is_ok();
                continue;
            }
            batch = async { input.lock().await.recv().await } => batch,
        };
        let Some(batch) = next else { break };

        match submit_with_retry(backend.as_ref(), &batch, &options).await {
            Ok(count) => {
                stats.batches_submitted += 1;
                stats.documents_ingested += count;
            }
            Err((attempts, e)) => {
                error!(
                    submitter = id,
                    batch = batch.index,
                    attempts,
                    error = %e,
                    "batch dead-lettered"
                );
                stats.failed.push(FailedBatch {
                    index: batch.index,
                    size: batch.len(),
                    attempts,
                    error: e.to_string(),
                    batch,
                });
            }
        }
    }
    debug!(submitter = id, submitted = stats.batches_submitted, "submitter finished");
    stats
}

async fn submit_with_retry(
    backend: &dyn IndexBackend,
    batch: &IngestBatch,
    options: &IngestOptions,
) -> Result<u64, (u32, BackendError)> {
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match backend.ingest(batch).await {
            Ok(resp) => resp.check(),
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => return Ok(count),
            Err(e) if attempt >= max_attempts => return Err((attempt, e)),
            Err(e) => {
                let delay = options.retry_backoff * 2u32.saturating_pow((attempt - 1).min(16));
                warn!(
                    batch = batch.index,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "batch submit failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn write_dead_letters(path: &Path, failed: &[FailedBatch]) -> Result<(), IngestError> {
    if failed.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::new();
    for batch in failed {
        serde_json::to_writer(&mut buf, batch)
            .map_err(|e| IngestError::DeadLetter(std::io::Error::other(e)))?;
        buf.push(b'\n');
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(IngestError::DeadLetter)?;
    file.write_all(&buf).await.map_err(IngestError::DeadLetter)?;
    file.flush().await.map_err(IngestError::DeadLetter)?;
    warn!(path = %path.display(), batches = failed.len(), "dead-letter file updated");
    Ok(())
}
