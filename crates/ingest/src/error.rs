//! Ingest error types.

use thiserror::Error;

use connect_core::ConnectError;

use crate::ingest::IngestReport;

/// Failure of a single submit call. Retried, then dead-lettered.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingest failed: {0}")]
    Rejected(String),

    #[error("no documents ingested: {0}")]
    NothingIngested(String),
}

/// Run-fatal ingest failures.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Reading stopped part way. `report` holds every batch that was read,
    /// including the ones that were never submitted.
    #[error("feedstock error: {source}")]
    Reader {
        #[source]
        source: ConnectError,
        report: Box<IngestReport>,
    },

    #[error("dead-letter write failed: {0}")]
    DeadLetter(#[source] std::io::Error),

    #[error("task failed: {0}")]
    Task(String),
}

/// Validation aborts the whole ingestion of a dataset.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("feedstock is empty")]
    Empty,

    #[error("dataset entry rejected: {0}")]
    Dataset(String),

    #[error("record {index} rejected: {message}")]
    Record { index: usize, message: String },
}
