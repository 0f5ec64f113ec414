// SPDX-License-Identifier: PMPL-1.0-or-later
//! Relational rows and natural-key references

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{construct_collection_id, GranuleFile, GranuleStatus};

/// Granule row in the relational store.
///
/// References to other tables are internal numeric ids; `cumulus_id` is
/// `None` until the row has been inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleRecord {
    pub cumulus_id: Option<i64>,
    pub granule_id: String,
    pub collection_cumulus_id: i64,
    pub status: GranuleStatus,
    /// Execution that last set the status.
    pub execution_cumulus_id: Option<i64>,
    pub provider_cumulus_id: Option<i64>,
    pub pdr_cumulus_id: Option<i64>,
    pub cmr_link: Option<String>,
    pub published: bool,
    pub error: Value,
    pub product_volume: Option<u64>,
    pub duration: Option<f64>,
    pub time_to_archive: Option<f64>,
    pub time_to_preprocess: Option<f64>,
    pub beginning_date_time: Option<String>,
    pub ending_date_time: Option<String>,
    pub production_date_time: Option<String>,
    pub last_update_date_time: Option<String>,
    pub query_fields: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// File row, unique on `(bucket, key, granule_cumulus_id)`.
///
/// `bucket` and `key` are NOT NULL columns; the store rejects rows missing
/// either one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub cumulus_id: Option<i64>,
    pub granule_cumulus_id: i64,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub checksum_type: Option<String>,
    pub checksum_value: Option<String>,
    pub source: Option<String>,
    pub file_type: Option<String>,
}

impl FileRecord {
    pub fn from_file(granule_cumulus_id: i64, file: &GranuleFile) -> Self {
        Self {
            cumulus_id: None,
            granule_cumulus_id,
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            file_name: file.file_name.clone(),
            file_size: file.size,
            checksum_type: file.checksum_type.clone(),
            checksum_value: file.checksum.clone(),
            source: file.source.clone(),
            file_type: file.file_type.clone(),
        }
    }

    pub fn to_file(&self) -> GranuleFile {
        GranuleFile {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            file_name: self.file_name.clone(),
            size: self.file_size,
            checksum: self.checksum_value.clone(),
            checksum_type: self.checksum_type.clone(),
            source: self.source.clone(),
            file_type: self.file_type.clone(),
        }
    }

    /// Whether this row and `other` address the same object.
    pub fn same_location(&self, other: &FileRecord) -> bool {
        self.bucket == other.bucket && self.key == other.key
    }
}

/// Tables a [`Reference`] can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Collection,
    Execution,
    Provider,
    Pdr,
    AsyncOperation,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = match self {
            ReferenceKind::Collection => "collections",
            ReferenceKind::Execution => "executions",
            ReferenceKind::Provider => "providers",
            ReferenceKind::Pdr => "pdrs",
            ReferenceKind::AsyncOperation => "async_operations",
        };
        f.write_str(table)
    }
}

/// A natural key that resolves to an internal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Collection { name: String, version: String },
    ExecutionUrl(String),
    ExecutionArn(String),
    Provider(String),
    Pdr(String),
    AsyncOperation(String),
}

impl Reference {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Reference::Collection { .. } => ReferenceKind::Collection,
            Reference::ExecutionUrl(_) | Reference::ExecutionArn(_) => ReferenceKind::Execution,
            Reference::Provider(_) => ReferenceKind::Provider,
            Reference::Pdr(_) => ReferenceKind::Pdr,
            Reference::AsyncOperation(_) => ReferenceKind::AsyncOperation,
        }
    }

    /// Human-readable key, used in not-found errors.
    pub fn natural_key(&self) -> String {
        match self {
            Reference::Collection { name, version } => construct_collection_id(name, version),
            Reference::ExecutionUrl(key)
            | Reference::ExecutionArn(key)
            | Reference::Provider(key)
            | Reference::Pdr(key)
            | Reference::AsyncOperation(key) => key.clone(),
        }
    }
}
