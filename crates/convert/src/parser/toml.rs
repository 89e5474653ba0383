use std::path::Path;

use serde_json::Value;

use connect_core::Record;

use super::{read_text, shape_document, Parser, ParserKind};
use crate::error::ParseError;

/// Parses TOML documents (always a table at the root).
pub struct TomlParser;

impl Parser for TomlParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Toml
    }

    fn try_parse(&self, path: &Path, params: Option<&Value>) -> Result<Record, ParseError> {
        let text = read_text(path)?;
        let value: Value = ::toml::from_str(&text).map_err(|e| ParseError::Format {
            parser: self.kind(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        shape_document(self.kind(), path, value, params)
    }
}
