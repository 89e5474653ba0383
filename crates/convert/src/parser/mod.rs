//! Record extraction from individual data files.
//!
//! The parser set is closed: every [`ParserKind`] maps to one [`Parser`]
//! implementation. Groups select parsers by an ordered list of kinds.

mod json;
mod toml;
mod yaml;

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use connect_core::{merge_records, Record};

use crate::error::ParseError;

pub use self::json::JsonParser;
pub use self::toml::TomlParser;
pub use self::yaml::YamlParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Json,
    Yaml,
    Toml,
}

impl ParserKind {
    /// Default parser order for groups that name none.
    pub const ALL: [ParserKind; 3] = [ParserKind::Json, ParserKind::Yaml, ParserKind::Toml];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Json => "json",
            ParserKind::Yaml => "yaml",
            ParserKind::Toml => "toml",
        }
    }

    pub fn parser(&self) -> &'static dyn Parser {
        match self {
            ParserKind::Json => &JsonParser,
            ParserKind::Yaml => &YamlParser,
            ParserKind::Toml => &TomlParser,
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts a record from one file, or explains why it could not.
pub trait Parser: Send + Sync {
    fn kind(&self) -> ParserKind;

    /// `params` is this parser's entry from the group params, if any.
    fn try_parse(&self, path: &Path, params: Option<&Value>) -> Result<Record, ParseError>;
}

/// Run every parser in `kinds` against `path` and merge what succeeds.
///
/// Failures are expected (most files only fit one format) and are skipped.
pub fn omniparse(path: &Path, kinds: &[ParserKind], params: &Map<String, Value>) -> Record {
    let mut record = Record::new();
    for kind in kinds {
        match kind.parser().try_parse(path, params.get(kind.as_str())) {
            Ok(parsed) => record = merge_records(record, parsed),
            Err(e) => debug!(parser = %kind, path = %path.display(), error = %e, "no data"),
        }
    }
    record
}

fn read_text(path: &Path) -> Result<String, ParseError> {
    fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Common post-processing for structured documents.
///
/// - `mapping`: `{"dest.path": "src.path"}` projects selected fields.
/// - `block`: nests the result under that key.
fn shape_document(
    kind: ParserKind,
    path: &Path,
    value: Value,
    params: Option<&Value>,
) -> Result<Record, ParseError> {
    let Value::Object(doc) = value else {
        return Err(ParseError::NotMapping {
            parser: kind,
            path: path.to_path_buf(),
        });
    };

    let mut record = match params.and_then(|p| p.get("mapping")) {
        None => doc,
        Some(Value::Object(mapping)) => project(&doc, mapping)?,
        Some(_) => return Err(ParseError::BadParams("mapping must be an object".into())),
    };

    match params.and_then(|p| p.get("block")) {
        None => {}
        Some(Value::String(block)) => {
            let mut wrapped = Record::new();
            wrapped.insert(block.clone(), Value::Object(record));
            record = wrapped;
        }
        Some(_) => return Err(ParseError::BadParams("block must be a string".into())),
    }

    if record.is_empty() {
        return Err(ParseError::NoData);
    }
    Ok(record)
}

fn project(doc: &Record, mapping: &Map<String, Value>) -> Result<Record, ParseError> {
    let mut out = Record::new();
    for (dest, src) in mapping {
        let src = src
            .as_str()
            .ok_or_else(|| ParseError::BadParams(format!("mapping source for '{dest}' must be a string")))?;
        if let Some(value) = lookup(doc, src) {
            insert_path(&mut out, dest, value.clone());
        }
    }
    Ok(out)
}

fn lookup<'a>(doc: &'a Record, dotted: &str) -> Option<&'a Value> {
    let mut parts = dotted.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn insert_path(out: &mut Record, dotted: &str, value: Value) {
    match dotted.split_once('.') {
        None => {
            out.insert(dotted.to_string(), value);
        }
        Some((head, rest)) => {
            let child = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}
