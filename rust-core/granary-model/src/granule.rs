// SPDX-License-Identifier: PMPL-1.0-or-later
//! Incoming payloads and the canonical granule record

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EventType, Field, GranuleStatus};

/// A file belonging to a granule.
///
/// `bucket` and `key` are required by the relational store, but payloads may
/// still omit them; the store rejects such files individually.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GranuleFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl GranuleFile {
    /// Create a file at `bucket`/`key`.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum_type: &str, checksum: &str) -> Self {
        self.checksum_type = Some(checksum_type.to_string());
        self.checksum = Some(checksum.to_string());
        self
    }

    /// `(bucket, key)` when both are set.
    pub fn location(&self) -> Option<(&str, &str)> {
        match (&self.bucket, &self.key) {
            (Some(bucket), Some(key)) => Some((bucket.as_str(), key.as_str())),
            _ => None,
        }
    }
}

/// A granule as sent by a caller: complete for a create, partial for a patch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GranulePayload {
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub granule_id: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub collection_id: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub status: Field<GranuleStatus>,
    /// Execution URL
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub execution: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub provider: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub pdr_name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub cmr_link: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub published: Field<bool>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub error: Field<Value>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub product_volume: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub duration: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub time_to_archive: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub time_to_preprocess: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub beginning_date_time: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub ending_date_time: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub production_date_time: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub last_update_date_time: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub query_fields: Field<Value>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub created_at: Field<i64>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub updated_at: Field<i64>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub timestamp: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub files: Field<Vec<GranuleFile>>,
}

impl GranulePayload {
    /// Start a payload for `granule_id` in `collection_id`.
    pub fn new(granule_id: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            granule_id: Field::Value(granule_id.into()),
            collection_id: Field::Value(collection_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: GranuleStatus) -> Self {
        self.status = Field::Value(status);
        self
    }

    pub fn with_files(mut self, files: Vec<GranuleFile>) -> Self {
        self.files = Field::Value(files);
        self
    }

    pub fn with_execution(mut self, execution_url: &str) -> Self {
        self.execution = Field::Value(execution_url.to_string());
        self
    }

    pub fn with_cmr_link(mut self, link: &str) -> Self {
        self.cmr_link = Field::Value(link.to_string());
        self
    }
}

/// The canonical granule shape shared by both mirrors and notifications.
///
/// Produced only by translating the relational record, never assembled from
/// a payload, so every store holds the same value after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Granule {
    pub granule_id: String,
    pub collection_id: String,
    pub status: GranuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdr_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmr_link: Option<String>,
    pub published: bool,
    pub error: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_archive: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_preprocess: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beginning_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_fields: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
    pub timestamp: i64,
    /// Absent when the granule has no files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<GranuleFile>>,
}

/// Message published on the notification channel after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleNotification {
    pub record: Granule,
    pub event: EventType,
}
