//! Index document formatting.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use connect_core::Record;

/// One feedstock entry wrapped for the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestDocument {
    pub subject: String,
    pub visible_to: Vec<String>,
    pub content: Record,
}

/// Wrap a feedstock entry for indexing.
///
/// The subject is `mdf.landing_page`, else `mdf.mdf_id`, else a fresh UUID.
/// Visibility comes from `mdf.acl` and defaults to public.
pub fn format_document(content: Record) -> IngestDocument {
    let mdf = content.get("mdf").and_then(Value::as_object);

    let subject = mdf
        .and_then(|m| m.get("landing_page").or_else(|| m.get("mdf_id")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let visible_to = mdf
        .and_then(|m| m.get("acl"))
        .and_then(Value::as_array)
        .map(|acl| {
            acl.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|acl| !acl.is_empty())
        .unwrap_or_else(|| vec!["public".to_string()]);

    IngestDocument {
        subject,
        visible_to,
        content,
    }
}

/// Documents submitted in one backend call. `index` is the order in which
/// the reader produced the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub index: usize,
    pub documents: Vec<IngestDocument>,
}

impl IngestBatch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// List envelope sent to the search service.
    pub fn to_payload(&self) -> Value {
        json!({
            "ingest_type": "GMetaList",
            "ingest_data": {
                "gmeta": self.documents,
            }
        })
    }
}
