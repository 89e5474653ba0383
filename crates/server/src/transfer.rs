//! Data transfer between endpoints.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("transfer exceeded {0:?}")]
    Timeout(Duration),

    #[error("path leaves its endpoint: {0}")]
    OutsideEndpoint(PathBuf),
}

/// Copies `(source, destination)` path pairs from one endpoint to another.
pub trait Transfer: Send + Sync {
    /// `None` timeout waits indefinitely.
    fn quick_transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        items: &[(PathBuf, PathBuf)],
        timeout: Option<Duration>,
    ) -> Result<(), TransferError>;
}

/// Filesystem transfer. An endpoint is a directory prefix and item paths are
/// resolved beneath it; the empty endpoint means paths are used as given.
/// `..` components are refused and symlinks are not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransfer;

impl LocalTransfer {
    fn resolve(endpoint: &str, path: &Path) -> Result<PathBuf, TransferError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(TransferError::OutsideEndpoint(path.to_path_buf()));
        }
        if endpoint.is_empty() {
            return Ok(path.to_path_buf());
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        Ok(Path::new(endpoint).join(relative))
    }
}

impl Transfer for LocalTransfer {
    fn quick_transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        items: &[(PathBuf, PathBuf)],
        timeout: Option<Duration>,
    ) -> Result<(), TransferError> {
        let started = Instant::now();
        let check_deadline = || match timeout {
            Some(limit) if started.elapsed() > limit => Err(TransferError::Timeout(limit)),
            _ => Ok(()),
        };

        for (src, dst) in items {
            let src = Self::resolve(source_endpoint, src)?;
            let dst = Self::resolve(destination_endpoint, dst)?;
            let meta = match fs::symlink_metadata(&src) {
                Ok(meta) => meta,
                Err(_) => return Err(TransferError::NotFound(src)),
            };
            if meta.file_type().is_symlink() {
                return Err(TransferError::OutsideEndpoint(src));
            }
            debug!(src = %src.display(), dst = %dst.display(), "transferring");

            if meta.is_file() {
                check_deadline()?;
                copy_file(&src, &dst)?;
                continue;
            }

            for entry in WalkDir::new(&src).sort_by_file_name() {
                check_deadline()?;
                let entry = entry?;
                let relative = entry.path().strip_prefix(&src).unwrap_or(entry.path());
                let target = dst.join(relative);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target).map_err(|source| TransferError::Io {
                        path: target.clone(),
                        source,
                    })?;
                } else if entry.file_type().is_file() {
                    copy_file(entry.path(), &target)?;
                } else {
                    debug!(path = %entry.path().display(), "skipping link or special file");
                }
            }
        }
        Ok(())
    }
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), TransferError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|source| TransferError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::copy(src, dst).map_err(|source| TransferError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}
