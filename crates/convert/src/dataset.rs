//! Dataset-entry normalization.

use serde_json::{Map, Value};
use tracing::warn;

use connect_core::Record;

const LONG_DESC: &str = "_description";
const SHORT_DESC: &str = "_desc";

/// `mdf.source_id` of a dataset entry, for logging.
pub fn source_id(dataset: &Record) -> &str {
    dataset
        .get("mdf")
        .and_then(|m| m.get("source_id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

/// Fold the legacy `custom` and `custom_desc` containers into one `custom`
/// mapping of string values.
///
/// `custom` is processed before `custom_desc`, so later keys win. Keys ending
/// in `_description` are shortened to `_desc`; bare keys in `custom_desc`
/// gain the `_desc` suffix.
pub fn normalize_dataset(mut dataset: Record) -> Record {
    let mut custom = Map::new();

    for (key, value) in take_object(&mut dataset, "custom") {
        let key = match key.strip_suffix(LONG_DESC) {
            Some(stem) => format!("{stem}{SHORT_DESC}"),
            None => key,
        };
        custom.insert(key, stringify(value));
    }

    for (key, value) in take_object(&mut dataset, "custom_desc") {
        let key = if key.ends_with(SHORT_DESC) {
            key
        } else if let Some(stem) = key.strip_suffix(LONG_DESC) {
            format!("{stem}{SHORT_DESC}")
        } else {
            format!("{key}{SHORT_DESC}")
        };
        custom.insert(key, stringify(value));
    }

    if !custom.is_empty() {
        dataset.insert("custom".to_string(), Value::Object(custom));
    }
    dataset
}

fn take_object(dataset: &mut Record, key: &str) -> Map<String, Value> {
    match dataset.remove(key) {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            warn!(field = key, value = %other, "dropping non-object custom block");
            Map::new()
        }
    }
}

/// Strings are kept verbatim; everything else becomes its JSON text.
fn stringify(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}
