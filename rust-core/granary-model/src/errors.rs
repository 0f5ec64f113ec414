// SPDX-License-Identifier: PMPL-1.0-or-later
//! Granule error documents.
//!
//! A granule's `error` column holds either `{}` (no error), a single
//! `{Error, Cause}` object, or `{"errors": [...]}` once more than one failure
//! has been recorded.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Cause")]
    pub cause: Value,
}

impl ErrorEntry {
    pub fn new(error: impl Into<String>, cause: impl Into<Value>) -> Self {
        Self {
            error: error.into(),
            cause: cause.into(),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Append `entry` to an existing error document.
///
/// A prior error that is not already a list becomes the first entry.
pub fn append_error(existing: &Value, entry: ErrorEntry) -> Value {
    let entry = json!(entry);
    let mut errors = match existing.get("errors").and_then(Value::as_array) {
        Some(list) => list.clone(),
        None if is_blank(existing) => Vec::new(),
        None => vec![existing.clone()],
    };
    errors.push(entry);
    json!({ "errors": errors })
}

/// Every well-formed entry in an error document.
pub fn error_entries(value: &Value) -> Vec<ErrorEntry> {
    match value.get("errors").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        None => serde_json::from_value(value.clone()).map(|e| vec![e]).unwrap_or_default(),
    }
}
