//! HTTP front-end for the convert and ingest pipelines.

pub mod api;
pub mod download;
pub mod jobs;
pub mod router;
pub mod state;
pub mod status;
pub mod transfer;

pub use download::DownloadError;
pub use router::build_router;
pub use state::AppState;
pub use status::{JobKind, JobRecord, JobStatus, StatusStore};
pub use transfer::{LocalTransfer, Transfer, TransferError};
