//! Deep-merge for JSON configuration and records.
//!
//! Conflict rule: when both sides are objects they are merged key by key,
//! recursively. In every other case the overlay value replaces the base value,
//! so sequences are replaced rather than appended and an explicit `null` in the
//! overlay wins as well.

use serde_json::Value;

use crate::feedstock::Record;

/// Merge `overlay` on top of `base`, returning a new value.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            Value::Object(merge_records(b.clone(), o.clone()))
        }
        (_, o) => o.clone(),
    }
}

/// Merge two maps, consuming both. Keys in `overlay` win on conflict.
pub fn merge_records(mut base: Record, overlay: Record) -> Record {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Object(b)), Value::Object(o)) => Value::Object(merge_records(b, o)),
            (_, v) => v,
        };
        base.insert(key, merged);
    }
    base
}
