use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Convert scientific data directories into feedstock and ingest it.
#[derive(Parser, Debug)]
#[command(name = "connect", version, about = "Convert data directories to feedstock and ingest them")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Group and parse a directory tree into a feedstock file
    Convert(ConvertArgs),
    /// Run the structural validator over a feedstock file
    Validate(ValidateArgs),
    /// Submit feedstock files to the search index
    Ingest(IngestArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Dataset root directory
    pub root: PathBuf,

    /// Dataset entry (JSON or TOML)
    #[arg(long)]
    pub dataset: PathBuf,

    /// Root grouping config (JSON or TOML)
    #[arg(long)]
    pub group_config: Option<PathBuf>,

    /// Per-parser params keyed by parser name (JSON or TOML)
    #[arg(long)]
    pub parsers: Option<PathBuf>,

    /// Transform workers (defaults to NUM_TRANSFORMERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Output feedstock file
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Feedstock to validate
    pub feedstock: PathBuf,

    /// Where to write the validated feedstock
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Feedstock files, ingested in order
    #[arg(required = true)]
    pub feedstock: Vec<PathBuf>,

    /// Max documents per batch; zero or negative sends one batch per file
    #[arg(long, allow_hyphen_values = true)]
    pub batch_size: Option<i64>,

    /// Concurrent submitters
    #[arg(long)]
    pub submitters: Option<usize>,

    /// Attempts per batch before it is dead-lettered
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Search service base URL (defaults to INGEST_INDEX_URL; unset means a dry run)
    #[arg(long)]
    pub index_url: Option<String>,

    /// Index name
    #[arg(long)]
    pub index: Option<String>,

    /// Append dead-lettered batches to this file
    #[arg(long)]
    pub dead_letter: Option<PathBuf>,
}
