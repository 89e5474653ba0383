//! Batched submission of feedstock to a search index.
//!
//! One reader turns feedstock sources into size-bounded [`IngestBatch`]es on a
//! bounded channel; a pool of submitters drains it against an
//! [`IndexBackend`], retrying failed batches and dead-lettering the ones that
//! never succeed.

pub mod backend;
pub mod batcher;
pub mod document;
pub mod error;
pub mod ingest;
pub mod validator;

pub use backend::{DryRunBackend, HttpIndexBackend, IndexBackend, IngestResponse};
pub use batcher::{BatchLimit, DocumentBatcher};
pub use document::{format_document, IngestBatch, IngestDocument};
pub use error::{BackendError, IngestError, ValidationError};
pub use ingest::{ingest, FailedBatch, FeedstockSource, IngestOptions, IngestReport, Ingester};
pub use validator::{validate_feedstock, StructuralValidator, ValidationResult, Validator};
