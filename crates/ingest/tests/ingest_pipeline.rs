//! Reader/submitter runs against in-process fake backends.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use connect_core::feedstock::write_feedstock;
use connect_core::Record;
use connect_ingest::{
    ingest, BackendError, FeedstockSource, IndexBackend, IngestBatch, IngestError, IngestOptions,
    IngestResponse, Ingester,
};

/// Accepts everything except the batch indexes in `reject`, and the first
/// `flaky` calls overall. With `stop` set, the first call flips shutdown.
#[derive(Default)]
struct FakeBackend {
    calls: AtomicUsize,
    accepted: Mutex<Vec<(usize, usize)>>,
    reject: HashSet<usize>,
    flaky: usize,
    report_zero: bool,
    stop: Option<watch::Sender<bool>>,
}

impl FakeBackend {
    fn accepted_sizes(&self) -> Vec<usize> {
        self.accepted.lock().unwrap().iter().map(|(_, size)| *size).collect()
    }
}

#[async_trait]
impl IndexBackend for FakeBackend {
    async fn ingest(&self, batch: &IngestBatch) -> Result<IngestResponse, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = &self.stop {
            let _ = stop.send(true);
        }
        if call < self.flaky {
            return Err(BackendError::Rejected(format!("transient failure {call}")));
        }
        if self.reject.contains(&batch.index) {
            return Ok(IngestResponse { success: false, num_documents_ingested: 0 });
        }
        if self.report_zero {
            return Ok(IngestResponse { success: true, num_documents_ingested: 0 });
        }
        self.accepted.lock().unwrap().push((batch.index, batch.len()));
        Ok(IngestResponse {
            success: true,
            num_documents_ingested: batch.len() as i64,
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            json!({"mdf": {"mdf_id": format!("rec-{i}")}, "value": i})
                .as_object()
                .cloned()
                .unwrap()
        })
        .collect()
}

fn fast_options(batch_size: i64, submitters: usize) -> IngestOptions {
    IngestOptions {
        batch_size,
        num_submitters: submitters,
        retry_backoff: Duration::from_millis(1),
        ..IngestOptions::default()
    }
}

#[tokio::test]
async fn single_submitter_sees_batches_in_order() {
    let backend = Arc::new(FakeBackend::default());
    let report = Ingester::new(backend.clone(), fast_options(100, 1))
        .run(vec![records(250)])
        .await
        .unwrap();

    assert_eq!(backend.accepted_sizes(), vec![100, 100, 50]);
    assert_eq!(report.records_read, 250);
    assert_eq!(report.batches_queued, 3);
    assert_eq!(report.batches_submitted, 3);
    assert_eq!(report.documents_ingested, 250);
    assert!(report.is_success());
}

#[tokio::test]
async fn submitter_pool_submits_every_batch() {
    let backend = Arc::new(FakeBackend::default());
    let report = ingest(backend.clone(), vec![records(250)], 100).await.unwrap();

    let mut sizes = backend.accepted_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert!(report.is_success());
}

#[tokio::test]
async fn non_positive_batch_size_makes_one_call() {
    for size in [0, -1] {
        let backend = Arc::new(FakeBackend::default());
        let report = ingest(backend.clone(), vec![records(250)], size).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.accepted_sizes(), vec![250]);
        assert_eq!(report.documents_ingested, 250);
    }
}

#[tokio::test]
async fn failing_batch_is_dead_lettered_without_blocking_others() {
    let backend = Arc::new(FakeBackend {
        reject: HashSet::from([1]),
        ..FakeBackend::default()
    });
    let mut opts = fast_options(100, 2);
    opts.max_attempts = 2;
    let report = Ingester::new(backend.clone(), opts)
        .run(vec![records(250)])
        .await
        .unwrap();

    assert_eq!(report.batches_submitted, 2);
    assert_eq!(report.documents_ingested, 150);
    assert_eq!(report.failed_batches.len(), 1);
    let failed = &report.failed_batches[0];
    assert_eq!(failed.index, 1);
    assert_eq!(failed.size, 100);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.batch.len(), 100);
    assert_eq!(report.abandoned(), 0);
    assert!(!report.is_success());
    // two attempts on the bad batch, one each on the others
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let backend = Arc::new(FakeBackend {
        flaky: 2,
        ..FakeBackend::default()
    });
    let report = Ingester::new(backend.clone(), fast_options(100, 1))
        .run(vec![records(10)])
        .await
        .unwrap();

    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.accepted_sizes(), vec![10]);
    assert!(report.is_success());
}

#[tokio::test]
async fn zero_ingested_counts_as_failure() {
    let backend = Arc::new(FakeBackend {
        report_zero: true,
        ..FakeBackend::default()
    });
    let mut opts = fast_options(100, 1);
    opts.max_attempts = 1;
    let report = Ingester::new(backend, opts).run(vec![records(5)]).await.unwrap();

    assert_eq!(report.failed_batches.len(), 1);
    assert!(report.failed_batches[0].error.contains("no documents ingested"));
}

#[tokio::test]
async fn dead_letters_are_written_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter = dir.path().join("dead.jsonl");
    let backend = Arc::new(FakeBackend {
        reject: HashSet::from([0, 2]),
        ..FakeBackend::default()
    });
    let mut opts = fast_options(2, 3);
    opts.max_attempts = 1;
    opts.dead_letter_path = Some(dead_letter.clone());

    let report = Ingester::new(backend, opts).run(vec![records(5)]).await.unwrap();
    assert_eq!(report.failed_batches.len(), 2);

    let text = std::fs::read_to_string(&dead_letter).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["index"], json!(0));
    assert_eq!(lines[1]["index"], json!(2));
    assert_eq!(lines[1]["size"], json!(1));
    assert_eq!(lines[0]["batch"]["documents"][0]["subject"], json!("rec-0"));
}

#[tokio::test]
async fn each_source_flushes_its_own_tail() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.json");
    let second = dir.path().join("b.json");
    write_feedstock(&first, &records(3)).unwrap();
    write_feedstock(&second, &records(2)).unwrap();

    let backend = Arc::new(FakeBackend::default());
    let report = Ingester::new(backend.clone(), fast_options(100, 1))
        .run(vec![first, second])
        .await
        .unwrap();

    assert_eq!(backend.accepted_sizes(), vec![3, 2]);
    assert_eq!(report.records_read, 5);
}

#[tokio::test]
async fn file_and_memory_sources_mix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stock.json");
    write_feedstock(&path, &records(4)).unwrap();

    let backend = Arc::new(FakeBackend::default());
    let sources = vec![FeedstockSource::from(path), FeedstockSource::from(records(6))];
    let report = Ingester::new(backend.clone(), fast_options(5, 1))
        .run(sources)
        .await
        .unwrap();

    // 4 from the file, then 5 + 1 from memory
    assert_eq!(backend.accepted_sizes(), vec![4, 5, 1]);
    assert_eq!(report.documents_ingested, 10);
}

#[tokio::test]
async fn missing_feedstock_file_is_fatal() {
    let backend = Arc::new(FakeBackend::default());
    let missing = PathBuf::from("/nonexistent/feedstock.json");
    let err = Ingester::new(backend.clone(), fast_options(100, 2))
        .run(vec![missing])
        .await
        .unwrap_err();

    match err {
        IngestError::Reader { report, .. } => {
            assert_eq!(report.records_read, 0);
            assert!(report.failed_batches.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reader_error_keeps_rejected_batches() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter = dir.path().join("dead.jsonl");
    let backend = Arc::new(FakeBackend {
        reject: HashSet::from([0]),
        ..FakeBackend::default()
    });
    let mut opts = fast_options(100, 2);
    opts.max_attempts = 1;
    opts.dead_letter_path = Some(dead_letter.clone());

    let sources = vec![
        FeedstockSource::from(records(5)),
        FeedstockSource::from(PathBuf::from("/nonexistent/second.json")),
    ];
    let err = Ingester::new(backend, opts).run(sources).await.unwrap_err();

    let IngestError::Reader { report, .. } = err else {
        panic!("expected a reader error, got {err}");
    };
    assert_eq!(report.records_read, 5);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].attempts, 1);
    assert_eq!(report.abandoned(), 0);

    let text = std::fs::read_to_string(&dead_letter).unwrap();
    let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["size"], json!(5));
}

#[tokio::test]
async fn malformed_line_returns_the_pending_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"a\": 1}\n{\"b\": 2}\nnot json\n").unwrap();

    let backend = Arc::new(FakeBackend::default());
    let err = Ingester::new(backend.clone(), fast_options(100, 1))
        .run(vec![path])
        .await
        .unwrap_err();

    let IngestError::Reader { report, .. } = err else {
        panic!("expected a reader error, got {err}");
    };
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.records_read, 2);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].attempts, 0);
    assert_eq!(report.failed_batches[0].size, 2);
    assert!(report.failed_batches[0].error.contains("feedstock read failed"));
}

#[tokio::test]
async fn shutdown_before_start_submits_nothing() {
    let (_tx, rx) = watch::channel(true);
    let backend = Arc::new(FakeBackend::default());
    let report = Ingester::new(backend.clone(), fast_options(10, 2))
        .with_shutdown(rx)
        .run(vec![records(50)])
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(report.batches_submitted, 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    // The first batch was formed before the reader saw the flag.
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].attempts, 0);
    assert_eq!(report.abandoned(), 0);
}

#[tokio::test]
async fn shutdown_mid_run_dead_letters_queued_batches() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter = dir.path().join("dead.jsonl");
    let (tx, rx) = watch::channel(false);
    let backend = Arc::new(FakeBackend {
        stop: Some(tx),
        ..FakeBackend::default()
    });
    let mut opts = fast_options(1, 1);
    opts.queue_capacity = 64;
    opts.dead_letter_path = Some(dead_letter.clone());

    let report = Ingester::new(backend.clone(), opts)
        .with_shutdown(rx)
        .run(vec![records(20)])
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.batches_submitted, 1);
    assert_eq!(report.abandoned(), 0);
    assert_eq!(
        report.batches_submitted + report.failed_batches.len(),
        report.batches_queued
    );
    assert!(report.failed_batches.iter().all(|f| f.attempts == 0));
    let sent: usize = report.failed_batches.iter().map(|f| f.size).sum::<usize>() + 1;
    assert_eq!(sent, report.records_read);

    let lines = std::fs::read_to_string(&dead_letter).unwrap().lines().count();
    assert_eq!(lines, report.failed_batches.len());
}
