use std::path::Path;

use serde_json::Value;

use connect_core::Record;

use super::{read_text, shape_document, Parser, ParserKind};
use crate::error::ParseError;

/// Parses YAML documents whose root is a mapping with string keys.
pub struct YamlParser;

impl Parser for YamlParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Yaml
    }

    fn try_parse(&self, path: &Path, params: Option<&Value>) -> Result<Record, ParseError> {
        let text = read_text(path)?;
        let value: Value = serde_yaml::from_str(&text).map_err(|e| ParseError::Format {
            parser: self.kind(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        shape_document(self.kind(), path, value, params)
    }
}
