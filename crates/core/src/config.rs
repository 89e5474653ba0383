use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub convert: ConvertConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CONNECT_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CONNECT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            paths: PathsConfig::from_env_profiled(p),
            convert: ConvertConfig::from_env_profiled(p),
            ingest: IngestConfig::from_env_profiled(p),
        }
    }

    /// Reject settings that would stall a pipeline (zero workers or
    /// zero-capacity queues) instead of letting a run hang.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("NUM_TRANSFORMERS", self.convert.num_transformers),
            ("CONVERT_QUEUE_CAPACITY", self.convert.queue_capacity),
            ("NUM_SUBMITTERS", self.ingest.num_submitters),
            ("INGEST_QUEUE_CAPACITY", self.ingest.queue_capacity),
            ("INGEST_MAX_ATTEMPTS", self.ingest.max_attempts as usize),
            ("STATUS_MAX_JOBS", self.server.max_jobs),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConnectError::Config(format!("{key} must be greater than zero")));
        }
        if self.ingest.index.trim().is_empty() {
            return Err(ConnectError::Config("INGEST_INDEX must not be empty".into()));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  paths:    source={}, local={}, backup={}, feedstock={}",
            self.paths.source_path.display(),
            self.paths.local_path.display(),
            self.paths.backup_path.display(),
            self.paths.feedstock_path.display()
        );
        tracing::info!(
            "  convert:  transformers={}, queue={}",
            self.convert.num_transformers,
            self.convert.queue_capacity
        );
        tracing::info!(
            "  ingest:   batch_size={}, submitters={}, index={}, url={}",
            self.ingest.batch_size,
            self.ingest.num_submitters,
            self.ingest.index,
            self.ingest.index_url.as_deref().unwrap_or("(dry run)")
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Finished jobs beyond this count are evicted from the status store,
    /// oldest first.
    pub max_jobs: usize,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 5000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            max_jobs: profiled_env_parse(p, "STATUS_MAX_JOBS", 1000),
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────

/// Working directories for downloaded data, backups and feedstock files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root that `data_path` in a convert request is resolved against.
    pub source_path: PathBuf,
    pub local_path: PathBuf,
    pub backup_path: PathBuf,
    pub feedstock_path: PathBuf,
}

impl PathsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            source_path: PathBuf::from(profiled_env_or(p, "SOURCE_PATH", "data/source")),
            local_path: PathBuf::from(profiled_env_or(p, "LOCAL_PATH", "data/local")),
            backup_path: PathBuf::from(profiled_env_or(p, "BACKUP_PATH", "data/backup")),
            feedstock_path: PathBuf::from(profiled_env_or(p, "FEEDSTOCK_PATH", "data/feedstock")),
        }
    }
}

// ── Convert ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub num_transformers: usize,
    pub queue_capacity: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            num_transformers: 1,
            queue_capacity: 256,
        }
    }
}

impl ConvertConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            num_transformers: profiled_env_parse(p, "NUM_TRANSFORMERS", d.num_transformers),
            queue_capacity: profiled_env_parse(p, "CONVERT_QUEUE_CAPACITY", d.queue_capacity),
        }
    }
}

// ── Ingest ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Max documents per batch; zero or negative means one unbounded batch.
    pub batch_size: i64,
    pub num_submitters: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Search service base URL. Unset means batches are only logged.
    pub index_url: Option<String>,
    pub index: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            num_submitters: 5,
            queue_capacity: 16,
            max_attempts: 3,
            retry_backoff_ms: 500,
            index_url: None,
            index: "mdf".to_string(),
        }
    }
}

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            batch_size: profiled_env_parse(p, "SEARCH_BATCH_SIZE", d.batch_size),
            num_submitters: profiled_env_parse(p, "NUM_SUBMITTERS", d.num_submitters),
            queue_capacity: profiled_env_parse(p, "INGEST_QUEUE_CAPACITY", d.queue_capacity),
            max_attempts: profiled_env_parse(p, "INGEST_MAX_ATTEMPTS", d.max_attempts),
            retry_backoff_ms: profiled_env_parse(p, "INGEST_RETRY_BACKOFF_MS", d.retry_backoff_ms),
            index_url: profiled_env_opt(p, "INGEST_INDEX_URL"),
            index: profiled_env_or(p, "INGEST_INDEX", &d.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; each test uses keys under its own profile.

    #[test]
    fn profiled_key_wins_over_plain_key() {
        env::set_var("CFGTESTA_NUM_SUBMITTERS", "9");
        let cfg = Config::for_profile("cfgtesta");
        assert_eq!(cfg.profile, "CFGTESTA");
        assert_eq!(cfg.ingest.num_submitters, 9);
        env::remove_var("CFGTESTA_NUM_SUBMITTERS");
    }

    #[test]
    fn unparseable_value_falls_back_to_default() {
        env::set_var("CFGTESTB_SEARCH_BATCH_SIZE", "lots");
        let cfg = Config::for_profile("CFGTESTB");
        assert_eq!(cfg.ingest.batch_size, 100);
        env::remove_var("CFGTESTB_SEARCH_BATCH_SIZE");
    }

    #[test]
    fn negative_batch_size_is_accepted() {
        env::set_var("CFGTESTC_SEARCH_BATCH_SIZE", "-1");
        let cfg = Config::for_profile("CFGTESTC");
        assert_eq!(cfg.ingest.batch_size, -1);
        env::remove_var("CFGTESTC_SEARCH_BATCH_SIZE");
    }

    #[test]
    fn zero_workers_fail_validation() {
        let mut cfg = Config::for_profile("CFGTESTD");
        assert!(cfg.validate().is_ok());
        cfg.ingest.num_submitters = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("NUM_SUBMITTERS"));

        let mut cfg = Config::for_profile("CFGTESTD");
        cfg.ingest.index = " ".into();
        assert!(matches!(cfg.validate(), Err(ConnectError::Config(_))));
    }

    #[test]
    fn profile_label_defaults() {
        let cfg = Config::for_profile("");
        assert_eq!(cfg.profile_label(), "default");
    }
}
