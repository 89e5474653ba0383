//! Feedstock validation.
//!
//! A [`Validator`] is fed the dataset entry first and then each record in
//! order. The first rejection aborts the dataset and cancels whatever the
//! validator had accumulated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use connect_core::Record;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    fn reason(&self) -> String {
        self.message.clone().unwrap_or_else(|| "no reason given".to_string())
    }
}

pub trait Validator: Send {
    fn start_dataset(&mut self, dataset: Record) -> ValidationResult;
    fn add_record(&mut self, record: Record) -> ValidationResult;
    /// Validated feedstock, dataset entry first. Drains the validator.
    fn get_finished_dataset(&mut self) -> Vec<Record>;
    fn cancel_validation(&mut self) -> ValidationResult;
}

/// Checks the structure every index document relies on and stamps the
/// bookkeeping fields under `mdf`.
#[derive(Debug, Default)]
pub struct StructuralValidator {
    dataset: Option<Record>,
    records: Vec<Record>,
    source_id: String,
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Validator for StructuralValidator {
    fn start_dataset(&mut self, dataset: Record) -> ValidationResult {
        if self.dataset.is_some() {
            return ValidationResult::rejected("dataset already started");
        }
        let source_id = dataset
            .get("mdf")
            .and_then(Value::as_object)
            .and_then(|mdf| mdf.get("source_id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if source_id.is_empty() {
            return ValidationResult::rejected("dataset entry needs a non-empty mdf.source_id");
        }
        self.source_id = source_id.to_string();
        self.dataset = Some(dataset);
        ValidationResult::ok()
    }

    fn add_record(&mut self, record: Record) -> ValidationResult {
        if self.dataset.is_none() {
            return ValidationResult::rejected("add_record called before start_dataset");
        }
        if record.is_empty() {
            return ValidationResult::rejected("record is empty");
        }
        if let Some(mdf) = record.get("mdf") {
            if !mdf.is_object() {
                return ValidationResult::rejected("record mdf block must be an object");
            }
        }
        self.records.push(record);
        ValidationResult::ok()
    }

    fn get_finished_dataset(&mut self) -> Vec<Record> {
        let Some(mut dataset) = self.dataset.take() else {
            return Vec::new();
        };
        let records = std::mem::take(&mut self.records);

        stamp_mdf(
            &mut dataset,
            [
                ("resource_type", Value::from("dataset")),
                ("num_records", Value::from(records.len())),
            ],
        );

        let mut out = Vec::with_capacity(records.len() + 1);
        out.push(dataset);
        for mut record in records {
            stamp_mdf(
                &mut record,
                [
                    ("resource_type", Value::from("record")),
                    ("source_id", Value::from(self.source_id.as_str())),
                ],
            );
            out.push(record);
        }
        out
    }

    fn cancel_validation(&mut self) -> ValidationResult {
        debug!(source_id = %self.source_id, dropped = self.records.len(), "validation cancelled");
        self.dataset = None;
        self.records.clear();
        ValidationResult::ok()
    }
}

fn stamp_mdf<const N: usize>(record: &mut Record, fields: [(&str, Value); N]) {
    let mut mdf = match record.remove("mdf") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in fields {
        mdf.insert(key.to_string(), value);
    }
    record.insert("mdf".to_string(), Value::Object(mdf));
}

/// Run a whole feedstock through `validator`: the first entry is the dataset,
/// the rest are records.
pub fn validate_feedstock(
    validator: &mut dyn Validator,
    feedstock: impl IntoIterator<Item = Record>,
) -> Result<Vec<Record>, ValidationError> {
    let mut entries = feedstock.into_iter();
    let dataset = entries.next().ok_or(ValidationError::Empty)?;

    let started = validator.start_dataset(dataset);
    if !started.success {
        warn!(reason = %started.reason(), "dataset entry rejected, cancelling validation");
        let cancelled = validator.cancel_validation();
        if !cancelled.success {
            warn!(reason = %cancelled.reason(), "validator could not cancel partial state");
        }
        return Err(ValidationError::Dataset(started.reason()));
    }

    for (index, record) in entries.enumerate() {
        let added = validator.add_record(record);
        if !added.success {
            warn!(record = index, reason = %added.reason(), "record rejected, cancelling validation");
            let cancelled = validator.cancel_validation();
            if !cancelled.success {
                warn!(reason = %cancelled.reason(), "validator could not cancel partial state");
            }
            return Err(ValidationError::Record {
                index,
                message: added.reason(),
            });
        }
    }

    Ok(validator.get_finished_dataset())
}
