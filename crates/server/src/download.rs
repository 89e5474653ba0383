//! HTTP data sources for convert jobs: a zip archive or a list of file URLs.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL {url}: {reason}")]
    BadUrl { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extract task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn parse_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::BadUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(DownloadError::BadUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

async fn fetch(client: &Client, url: Url) -> Result<Vec<u8>, DownloadError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        warn!(url = %url, %status, "download returned non-2xx status");
        return Err(DownloadError::Status {
            url: url.to_string(),
            status,
        });
    }
    Ok(response.bytes().await?.to_vec())
}

/// Download a zip archive and unpack it into `dest`.
///
/// Entries whose names would land outside `dest` are rejected by the archive
/// reader. Returns the number of archive entries.
pub async fn fetch_zip(client: &Client, url: &str, dest: &Path) -> Result<usize, DownloadError> {
    let url = parse_url(url)?;
    debug!(url = %url, dest = %dest.display(), "downloading archive");
    let body = fetch(client, url).await?;
    let size = body.len();

    let dest = dest.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || -> Result<usize, DownloadError> {
        std::fs::create_dir_all(&dest).map_err(|source| DownloadError::Io {
            path: dest.clone(),
            source,
        })?;
        let mut archive = ZipArchive::new(Cursor::new(body))?;
        archive.extract(&dest)?;
        Ok(archive.len())
    })
    .await??;

    info!(bytes = size, entries, "archive unpacked");
    Ok(entries)
}

/// Download each URL into `dest`, named after the last path segment.
pub async fn fetch_files(client: &Client, urls: &[String], dest: &Path) -> Result<usize, DownloadError> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

    for raw in urls {
        let url = parse_url(raw)?;
        let name = file_name(&url).ok_or_else(|| DownloadError::BadUrl {
            url: raw.clone(),
            reason: "no usable file name".into(),
        })?;
        let target = dest.join(&name);
        debug!(url = %url, target = %target.display(), "downloading file");
        let body = fetch(client, url).await?;
        tokio::fs::write(&target, &body)
            .await
            .map_err(|source| DownloadError::Io { path: target, source })?;
    }
    Ok(urls.len())
}

/// Last non-empty path segment, kept percent-encoded so it stays a plain name.
fn file_name(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let plain = segment != "." && segment != ".." && !segment.contains('\\');
    plain.then(|| segment.to_string())
}
