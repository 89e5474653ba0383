//! In-memory job status store.
//!
//! Every convert or ingest request gets a status id. Background jobs update
//! the record as they move through their phases; `/status` reads it back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Convert,
    Ingest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Converting,
    Validating,
    Ingesting,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub source_id: Option<String>,
    pub group_count: Option<usize>,
    pub records: Option<usize>,
    pub batches_submitted: usize,
    pub documents_ingested: u64,
    pub failed_batches: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(id: Uuid, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Pending,
            source_id: None,
            group_count: None,
            records: None,
            batches_submitted: 0,
            documents_ingested: 0,
            failed_batches: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Default cap on retained jobs.
pub const DEFAULT_MAX_JOBS: usize = 1000;

/// Insertion-ordered (oldest first) map of job records.
///
/// Once more than `max_jobs` records are held, the oldest finished ones are
/// evicted. Running jobs are never evicted.
#[derive(Debug, Clone)]
pub struct StatusStore {
    jobs: Arc<RwLock<IndexMap<Uuid, JobRecord>>>,
    max_jobs: usize,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_JOBS)
    }
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_jobs: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(IndexMap::new())),
            max_jobs: max_jobs.max(1),
        }
    }

    /// Register a new pending job and return its id.
    pub async fn create(&self, kind: JobKind) -> Uuid {
        let id = Uuid::new_v4();
        let mut jobs = self.jobs.write().await;
        jobs.insert(id, JobRecord::new(id, kind));
        evict_finished(&mut jobs, self.max_jobs);
        id
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.jobs.read().await.contains_key(&id)
    }

    /// Apply `f` to the record and bump `updated_at`. Unknown ids are ignored.
    pub async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        if let Some(record) = self.jobs.write().await.get_mut(&id) {
            f(record);
            record.updated_at = Utc::now();
        }
    }

    pub async fn set_status(&self, id: Uuid, status: JobStatus) {
        self.update(id, |r| r.status = status).await;
    }

    pub async fn fail(&self, id: Uuid, error: impl Into<String>) {
        let error = error.into();
        self.update(id, |r| {
            r.status = JobStatus::Failed;
            r.error = Some(error);
        })
        .await;
    }

    pub async fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.jobs.read().await.values().cloned().collect()
    }
}

fn evict_finished(jobs: &mut IndexMap<Uuid, JobRecord>, max_jobs: usize) {
    let mut excess = jobs.len().saturating_sub(max_jobs);
    if excess == 0 {
        return;
    }
    jobs.retain(|id, record| {
        if excess > 0 && record.status.is_terminal() {
            debug!(status_id = %id, "evicting finished job");
            excess -= 1;
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        for (variant, expected) in [
            (JobStatus::Pending, "pending"),
            (JobStatus::Downloading, "downloading"),
            (JobStatus::Converting, "converting"),
            (JobStatus::Validating, "validating"),
            (JobStatus::Ingesting, "ingesting"),
            (JobStatus::Succeeded, "succeeded"),
            (JobStatus::Failed, "failed"),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Ingesting.is_terminal());
    }

    #[tokio::test]
    async fn lifecycle_updates_record() {
        let store = StatusStore::new();
        let id = store.create(JobKind::Convert).await;
        let created = store.get(id).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        store.set_status(id, JobStatus::Converting).await;
        store.update(id, |r| r.records = Some(12)).await;
        let rec = store.get(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Converting);
        assert_eq!(rec.records, Some(12));
        assert!(rec.updated_at >= created.updated_at);

        store.fail(id, "download failed").await;
        let rec = store.get(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("download failed"));
    }

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let store = StatusStore::new();
        let a = store.create(JobKind::Convert).await;
        let b = store.create(JobKind::Ingest).await;
        let ids: Vec<Uuid> = store.list().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_evicted_first() {
        let store = StatusStore::with_limit(2);
        let done = store.create(JobKind::Convert).await;
        let running = store.create(JobKind::Convert).await;
        store.set_status(done, JobStatus::Succeeded).await;
        store.set_status(running, JobStatus::Converting).await;

        let third = store.create(JobKind::Ingest).await;
        let ids: Vec<Uuid> = store.list().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![running, third]);
    }

    #[tokio::test]
    async fn running_jobs_are_kept_past_the_limit() {
        let store = StatusStore::with_limit(1);
        let a = store.create(JobKind::Convert).await;
        let b = store.create(JobKind::Convert).await;
        assert_eq!(store.list().await.len(), 2);

        store.fail(a, "boom").await;
        let c = store.create(JobKind::Ingest).await;
        // a is gone; b is still pending, c is new.
        let ids: Vec<Uuid> = store.list().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b, c]);
    }
}
