use std::sync::Arc;

use connect_core::Config;
use connect_ingest::{DryRunBackend, HttpIndexBackend, IndexBackend};

use crate::status::StatusStore;
use crate::transfer::{LocalTransfer, Transfer};

pub struct AppState {
    pub config: Config,
    pub status: StatusStore,
    pub transfer: Arc<dyn Transfer>,
    pub backend: Arc<dyn IndexBackend>,
    /// Client for `zip` and `files` downloads.
    pub http: reqwest::Client,
}

impl AppState {
    /// Local transfers; the HTTP index when `INGEST_INDEX_URL` is set,
    /// otherwise a dry-run backend.
    pub fn new(config: Config) -> Self {
        let backend: Arc<dyn IndexBackend> = match &config.ingest.index_url {
            Some(url) => Arc::new(HttpIndexBackend::new(url, &config.ingest.index)),
            None => Arc::new(DryRunBackend),
        };
        Self::with_collaborators(config, Arc::new(LocalTransfer), backend)
    }

    pub fn with_collaborators(
        config: Config,
        transfer: Arc<dyn Transfer>,
        backend: Arc<dyn IndexBackend>,
    ) -> Self {
        let status = StatusStore::with_limit(config.server.max_jobs);
        Self {
            config,
            status,
            transfer,
            backend,
            http: reqwest::Client::new(),
        }
    }
}
