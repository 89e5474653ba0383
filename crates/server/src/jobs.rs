//! Background convert and ingest jobs.
//!
//! Request handlers register a status id and hand off to [`spawn_convert_job`]
//! or [`spawn_ingest_job`]. Any error ends the job as `failed` with the error
//! chain recorded in the status store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use connect_convert::group::NULL_ROOT;
use connect_convert::{convert, source_id, ConvertParams};
use connect_core::feedstock::{read_feedstock, write_feedstock};
use connect_core::Record;
use connect_ingest::{validate_feedstock, IngestError, IngestOptions, Ingester, StructuralValidator};

use crate::download;
use crate::state::AppState;
use crate::status::JobStatus;

/// Body of `POST /convert`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    pub dataset: Record,
    /// URL of a zip archive holding the raw data.
    #[serde(default)]
    pub zip: Option<String>,
    /// Directory or file under the configured source path.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    /// URLs of individual data files.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub group_config: Value,
    #[serde(default)]
    pub parsers: Map<String, Value>,
    #[serde(default)]
    pub num_transformers: Option<usize>,
}

/// Where a convert job gets its raw data.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Zip(String),
    Path(PathBuf),
    Files(Vec<String>),
}

impl ConvertRequest {
    /// First of `zip`, `data_path`, `files` that is set. Without any, only
    /// the dataset entry is produced.
    pub fn data_source(&self) -> Option<DataSource> {
        if let Some(url) = &self.zip {
            return Some(DataSource::Zip(url.clone()));
        }
        if let Some(path) = &self.data_path {
            return Some(DataSource::Path(path.clone()));
        }
        if !self.files.is_empty() {
            return Some(DataSource::Files(self.files.clone()));
        }
        None
    }
}

pub fn spawn_convert_job(state: Arc<AppState>, id: Uuid, request: ConvertRequest) {
    tokio::spawn(async move {
        if let Err(e) = run_convert_job(&state, id, request).await {
            error!(status_id = %id, error = %format!("{e:#}"), "convert job failed");
            state.status.fail(id, format!("{e:#}")).await;
        }
    });
}

pub fn spawn_ingest_job(state: Arc<AppState>, id: Uuid, feedstock_path: PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = run_ingest_job(&state, id, &feedstock_path).await {
            error!(status_id = %id, error = %format!("{e:#}"), "ingest job failed");
            state.status.fail(id, format!("{e:#}")).await;
        }
    });
}

/// Download, back up, convert, then ingest the resulting feedstock.
async fn run_convert_job(state: &AppState, id: Uuid, request: ConvertRequest) -> anyhow::Result<()> {
    let paths = &state.config.paths;
    let source_id = source_id(&request.dataset).to_string();
    info!(status_id = %id, source_id = %source_id, "convert job started");
    {
        let source_id = source_id.clone();
        state.status.update(id, |r| r.source_id = Some(source_id)).await;
    }

    let local_path = match request.data_source() {
        Some(source) => {
            state.status.set_status(id, JobStatus::Downloading).await;
            let local = download_and_backup(state, id, source).await?;
            info!(status_id = %id, local = %local.display(), "data downloaded and backed up");
            Some(local)
        }
        None => None,
    };

    state.status.set_status(id, JobStatus::Converting).await;
    let mut params = ConvertParams::new(request.dataset)
        .with_group_config(request.group_config)
        .with_parsers(request.parsers)
        .with_transformers(
            request
                .num_transformers
                .unwrap_or(state.config.convert.num_transformers),
        );
    params.queue_capacity = state.config.convert.queue_capacity;

    let root = local_path.clone().unwrap_or_else(|| PathBuf::from(NULL_ROOT));
    let output = convert(&root, params).await.context("conversion failed")?;
    if output.failed_groups > 0 || output.failed_workers > 0 {
        warn!(
            status_id = %id,
            failed_groups = output.failed_groups,
            failed_workers = output.failed_workers,
            "conversion finished with failures"
        );
    }
    let group_count = output.group_count;
    let records = output.feedstock.len() - 1;
    state
        .status
        .update(id, |r| {
            r.group_count = Some(group_count);
            r.records = Some(records);
        })
        .await;

    tokio::fs::create_dir_all(&paths.feedstock_path)
        .await
        .with_context(|| format!("cannot create {}", paths.feedstock_path.display()))?;
    let feedstock_path = paths.feedstock_path.join(format!("{id}.json"));
    let write_path = feedstock_path.clone();
    let feedstock = output.feedstock;
    tokio::task::spawn_blocking(move || write_feedstock(&write_path, &feedstock))
        .await
        .context("feedstock writer task failed")??;

    if let Some(local) = local_path {
        if let Err(e) = tokio::fs::remove_dir_all(&local).await {
            warn!(status_id = %id, path = %local.display(), error = %e, "could not remove local data");
        }
    }

    run_ingest_job(state, id, &feedstock_path).await
}

/// Fetch the raw data into `LOCAL_PATH/<id>` and copy it to `BACKUP_PATH/<id>`.
async fn download_and_backup(state: &AppState, id: Uuid, source: DataSource) -> anyhow::Result<PathBuf> {
    let paths = &state.config.paths;
    let job_dir = PathBuf::from(id.to_string());
    let local = paths.local_path.join(&job_dir);
    let source_ep = endpoint(&paths.source_path);
    let local_ep = endpoint(&paths.local_path);
    let backup_ep = endpoint(&paths.backup_path);

    match source {
        DataSource::Zip(url) => {
            download::fetch_zip(&state.http, &url, &local)
                .await
                .context("data download failed")?;
        }
        DataSource::Files(urls) => {
            download::fetch_files(&state.http, &urls, &local)
                .await
                .context("data download failed")?;
        }
        DataSource::Path(data_path) => {
            let transfer = state.transfer.clone();
            let (local_ep, dest) = (local_ep.clone(), job_dir.clone());
            tokio::task::spawn_blocking(move || {
                transfer.quick_transfer(&source_ep, &local_ep, &[(data_path, dest)], None)
            })
            .await
            .context("transfer task failed")?
            .context("data download failed")?;
        }
    }

    let transfer = state.transfer.clone();
    tokio::task::spawn_blocking(move || {
        transfer.quick_transfer(&local_ep, &backup_ep, &[(job_dir.clone(), job_dir)], None)
    })
    .await
    .context("transfer task failed")?
    .context("data backup failed")?;
    Ok(local)
}

fn endpoint(root: &Path) -> String {
    root.to_string_lossy().into_owned()
}

/// Validate a feedstock file, write the finalized copy, and submit it.
async fn run_ingest_job(state: &AppState, id: Uuid, feedstock_path: &Path) -> anyhow::Result<()> {
    state.status.set_status(id, JobStatus::Validating).await;

    let base = feedstock_path.to_path_buf();
    let validated = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Record>> {
        let entries = read_feedstock(&base)?;
        let mut validator = StructuralValidator::new();
        Ok(validate_feedstock(&mut validator, entries)?)
    })
    .await
    .context("validation task failed")?
    .context("feedstock validation failed")?;

    if let Err(e) = tokio::fs::remove_file(feedstock_path).await {
        warn!(status_id = %id, path = %feedstock_path.display(), error = %e, "could not remove raw feedstock");
    }

    let dir = &state.config.paths.feedstock_path;
    tokio::fs::create_dir_all(dir).await?;
    let final_path = dir.join(format!("{id}_final.json"));
    let records = validated.len().saturating_sub(1);
    let write_path = final_path.clone();
    tokio::task::spawn_blocking(move || write_feedstock(&write_path, &validated))
        .await
        .context("feedstock writer task failed")??;

    state
        .status
        .update(id, |r| {
            r.records = Some(records);
            r.status = JobStatus::Ingesting;
        })
        .await;

    let mut options = IngestOptions::from_config(&state.config.ingest);
    options.dead_letter_path = Some(dir.join(format!("{id}_dead_letter.json")));
    let outcome = Ingester::new(state.backend.clone(), options)
        .run([final_path])
        .await;

    let partial = match &outcome {
        Ok(report) => Some(report),
        Err(IngestError::Reader { report, .. }) => Some(report.as_ref()),
        Err(_) => None,
    };
    if let Some(report) = partial {
        let (submitted, documents, failed) = (
            report.batches_submitted,
            report.documents_ingested,
            report.failed_batches.len(),
        );
        state
            .status
            .update(id, |r| {
                r.batches_submitted = submitted;
                r.documents_ingested = documents;
                r.failed_batches = failed;
            })
            .await;
    }
    let report = outcome.context("ingest failed")?;

    if !report.is_success() {
        bail!(
            "{} of {} batches dead-lettered, {} abandoned",
            report.failed_batches.len(),
            report.batches_queued,
            report.abandoned()
        );
    }

    state.status.set_status(id, JobStatus::Succeeded).await;
    info!(
        status_id = %id,
        records,
        documents = report.documents_ingested,
        "processing complete"
    );
    Ok(())
}
