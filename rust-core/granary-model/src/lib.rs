// SPDX-License-Identifier: PMPL-1.0-or-later
//! Granary data model
//!
//! A granule is a unit of ingested data identified by `(granule_id,
//! collection_id)`. It exists in three shapes:
//!
//! - [`GranulePayload`]: what a caller sends. Every optional attribute is a
//!   [`Field`] so omission and explicit `null` stay distinguishable.
//! - [`GranuleRecord`] / [`FileRecord`]: the relational rows, keyed by
//!   internal numeric ids.
//! - [`Granule`]: the canonical record held by the document mirror and the
//!   search index and published on the notification channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod errors;
mod field;
mod granule;
mod record;

pub use errors::{append_error, error_entries, ErrorEntry};
pub use field::Field;
pub use granule::{Granule, GranuleFile, GranuleNotification, GranulePayload};
pub use record::{FileRecord, GranuleRecord, Reference, ReferenceKind};

/// Separator between collection name and version in a collection id.
pub const COLLECTION_ID_SEPARATOR: &str = "___";

/// Model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid collection id {0:?}: expected name___version")]
    InvalidCollectionId(String),

    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Granule lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GranuleStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl GranuleStatus {
    /// `completed` and `failed` end a workflow run.
    pub fn is_final(self) -> bool {
        matches!(self, GranuleStatus::Completed | GranuleStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GranuleStatus::Queued => "queued",
            GranuleStatus::Running => "running",
            GranuleStatus::Completed => "completed",
            GranuleStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for GranuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event tag carried by a granule notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    Create,
    Update,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Create => write!(f, "Create"),
            EventType::Update => write!(f, "Update"),
        }
    }
}

/// Build a collection id from its name and version.
pub fn construct_collection_id(name: &str, version: &str) -> String {
    format!("{name}{COLLECTION_ID_SEPARATOR}{version}")
}

/// Split a collection id into `(name, version)`.
pub fn deconstruct_collection_id(collection_id: &str) -> Result<(String, String), ModelError> {
    match collection_id.split_once(COLLECTION_ID_SEPARATOR) {
        Some((name, version))
            if !name.is_empty()
                && !version.is_empty()
                && !version.contains(COLLECTION_ID_SEPARATOR) =>
        {
            Ok((name.to_string(), version.to_string()))
        }
        _ => Err(ModelError::InvalidCollectionId(collection_id.to_string())),
    }
}

/// Epoch milliseconds to a UTC timestamp.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, ModelError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(ModelError::InvalidTimestamp(millis))
}

/// UTC timestamp to epoch milliseconds.
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}
