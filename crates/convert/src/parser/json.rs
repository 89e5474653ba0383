use std::path::Path;

use serde_json::Value;

use connect_core::Record;

use super::{read_text, shape_document, Parser, ParserKind};
use crate::error::ParseError;

/// Parses files holding a single top-level JSON object.
pub struct JsonParser;

impl Parser for JsonParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Json
    }

    fn try_parse(&self, path: &Path, params: Option<&Value>) -> Result<Record, ParseError> {
        let text = read_text(path)?;
        let value: Value = serde_json::from_str(&text).map_err(|e| ParseError::Format {
            parser: self.kind(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        shape_document(self.kind(), path, value, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, r#"{"x": [1, 2]}"#).unwrap();
        let record = JsonParser.try_parse(&path, None).unwrap();
        assert_eq!(record["x"], json!([1, 2]));
    }

    #[test]
    fn rejects_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            JsonParser.try_parse(&path, None),
            Err(ParseError::Format { parser: ParserKind::Json, .. })
        ));
    }
}
