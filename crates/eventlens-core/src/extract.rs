use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diagnostics::{Rejection, RejectionReason, RejectionSink};

pub const REQUIRED_FIELDS: [&str; 3] = ["user_id", "timestamp", "event_type"];

/// A record exactly as it appeared in the input array.
pub type RawEvent = Value;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("input file {} not found", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("input is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input must be a JSON array of events, found {found}")]
    NotAnArray { found: &'static str },
}

/// An event that carried all required fields with truthy values.
///
/// Only [`validate_events`] can build one; the wrapped mapping is never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEvent(Map<String, Value>);

impl ValidEvent {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// Reads `path` and parses it as a JSON array. Any failure here is fatal for the run.
pub fn load_events(path: &Path) -> Result<Vec<RawEvent>, ExtractError> {
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ExtractError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ExtractError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_events(&content)
}

pub fn parse_events(content: &str) -> Result<Vec<RawEvent>, ExtractError> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(records) => Ok(records),
        other => Err(ExtractError::NotAnArray {
            found: json_kind(&other),
        }),
    }
}

/// Keeps the records that carry every required field with a truthy value, in input order.
/// Every dropped record is handed to `sink`.
pub fn validate_events(records: Vec<RawEvent>, sink: &mut dyn RejectionSink) -> Vec<ValidEvent> {
    let total = records.len();
    let mut valid = Vec::with_capacity(total);

    for (index, record) in records.into_iter().enumerate() {
        match check_record(&record) {
            Ok(()) => {
                if let Value::Object(fields) = record {
                    valid.push(ValidEvent(fields));
                }
            }
            Err(reason) => {
                warn!(index, %reason, "dropping malformed event");
                let rejection = Rejection {
                    index,
                    reason,
                    record,
                };
                if let Err(err) = sink.record(&rejection) {
                    warn!(index, error = %err, "failed to write rejection diagnostic");
                }
            }
        }
    }

    debug!(total, valid = valid.len(), "validated events");
    valid
}

/// Loads, parses and validates the input file in one step.
pub fn extract_events(
    path: &Path,
    sink: &mut dyn RejectionSink,
) -> Result<Vec<ValidEvent>, ExtractError> {
    let records = load_events(path)?;
    info!(path = %path.display(), records = records.len(), "loaded raw events");
    Ok(validate_events(records, sink))
}

fn check_record(record: &Value) -> Result<(), RejectionReason> {
    let Value::Object(fields) = record else {
        return Err(RejectionReason::NotAnObject);
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|key| !fields.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(RejectionReason::MissingKeys(missing));
    }

    let empty: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|key| fields.get(*key).is_some_and(|value| !is_truthy(value)))
        .collect();
    if !empty.is_empty() {
        return Err(RejectionReason::EmptyValues(empty));
    }

    Ok(())
}

/// Zero, `false`, `null` and empty strings/arrays/objects all count as empty.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
