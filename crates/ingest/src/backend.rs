//! Indexing backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::IngestBatch;
use crate::error::BackendError;

/// Answer of one bulk-submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(default)]
    pub num_documents_ingested: i64,
}

impl IngestResponse {
    /// A response only counts when it reports success and at least one document.
    pub fn check(&self) -> Result<u64, BackendError> {
        if !self.success {
            return Err(BackendError::Rejected(
                "backend reported success = false".to_string(),
            ));
        }
        if self.num_documents_ingested <= 0 {
            return Err(BackendError::NothingIngested(format!(
                "backend reported {} documents",
                self.num_documents_ingested
            )));
        }
        Ok(self.num_documents_ingested as u64)
    }
}

/// A search index that accepts batches of documents.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn ingest(&self, batch: &IngestBatch) -> Result<IngestResponse, BackendError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// POSTs the batch envelope as JSON to `{base_url}/ingest/{index}`.
#[derive(Debug, Clone)]
pub struct HttpIndexBackend {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpIndexBackend {
    pub fn new(base_url: &str, index: &str) -> Self {
        let endpoint = format!("{}/ingest/{}", base_url.trim_end_matches('/'), index);
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IndexBackend for HttpIndexBackend {
    async fn ingest(&self, batch: &IngestBatch) -> Result<IngestResponse, BackendError> {
        debug!(endpoint = %self.endpoint, batch = batch.index, size = batch.len(), "submitting batch");
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&batch.to_payload())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Rejected(format!("{status}: {body}")));
        }

        Ok(resp.json::<IngestResponse>().await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Accepts every batch without sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBackend;

#[async_trait]
impl IndexBackend for DryRunBackend {
    async fn ingest(&self, batch: &IngestBatch) -> Result<IngestResponse, BackendError> {
        info!(batch = batch.index, documents = batch.len(), "dry run: batch accepted");
        Ok(IngestResponse {
            success: true,
            num_documents_ingested: batch.len() as i64,
        })
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
