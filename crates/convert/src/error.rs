use std::path::PathBuf;

use thiserror::Error;

use crate::parser::ParserKind;

/// Why a single parser produced nothing for a file. Always recoverable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{parser} cannot parse {path}: {message}")]
    Format {
        parser: ParserKind,
        path: PathBuf,
        message: String,
    },

    #[error("{parser}: top-level value in {path} is not a mapping")]
    NotMapping { parser: ParserKind, path: PathBuf },

    #[error("invalid parser params: {0}")]
    BadParams(String),

    #[error("no data extracted")]
    NoData,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot list directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid grouping config: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),
}
