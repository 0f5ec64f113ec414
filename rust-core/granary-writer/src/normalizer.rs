// SPDX-License-Identifier: PMPL-1.0-or-later
//! Field normalization.
//!
//! Turns a raw [`GranulePayload`] into the shape the core writer merges onto
//! the stored row: required fields checked, defaults injected, explicit
//! `null` on a defaulted column replaced by its default, and the product
//! volume recomputed when (and only when) the payload carries files.

use chrono::{DateTime, Utc};
use serde_json::json;

use granary_model::{
    deconstruct_collection_id, from_millis, to_millis, Field, GranuleFile, GranulePayload,
    GranuleRecord,
};

use crate::error::WriteError;
use crate::resolver::ResolvedRefs;

/// Default timestamps for one write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Defaults {
    /// `createdAt` for a new row (write time, or workflow start on the
    /// message path)
    pub created_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl Defaults {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            now,
        }
    }
}

/// Identity of a validated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GranuleKey {
    pub granule_id: String,
    pub collection_id: String,
    pub collection_name: String,
    pub collection_version: String,
}

fn required_str<'a>(field: &'a Field<String>, name: &str) -> Result<&'a str, WriteError> {
    match field.as_value() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(WriteError::Validation(format!("{name} is required"))),
    }
}

fn check_checksum(file: &GranuleFile) -> Result<(), WriteError> {
    if file.size.is_some() && file.checksum.is_some() != file.checksum_type.is_some() {
        return Err(WriteError::Validation(format!(
            "file {}: checksum and checksumType must be provided together",
            file.key.as_deref().unwrap_or("<no key>")
        )));
    }
    Ok(())
}

/// Checks that need no store access.
pub(crate) fn validate(payload: &GranulePayload) -> Result<GranuleKey, WriteError> {
    let granule_id = required_str(&payload.granule_id, "granuleId")?;
    let collection_id = required_str(&payload.collection_id, "collectionId")?;
    let (collection_name, collection_version) = deconstruct_collection_id(collection_id)
        .map_err(|e| WriteError::Validation(e.to_string()))?;

    match &payload.files {
        Field::Null => return Err(WriteError::Validation("files must not be null".to_string())),
        Field::Value(files) => files.iter().try_for_each(check_checksum)?,
        Field::Missing => {}
    }

    Ok(GranuleKey {
        granule_id: granule_id.to_string(),
        collection_id: collection_id.to_string(),
        collection_name,
        collection_version,
    })
}

/// Sum of file sizes, saturating at `u64::MAX`; files without a size count
/// as zero.
pub(crate) fn product_volume(files: &[GranuleFile]) -> u64 {
    files
        .iter()
        .filter_map(|f| f.size)
        .fold(0u64, u64::saturating_add)
}

/// Inject defaults and resolve null semantics.
pub(crate) fn normalize(
    payload: GranulePayload,
    is_new: bool,
    defaults: &Defaults,
) -> Result<GranulePayload, WriteError> {
    let mut payload = payload;

    match payload.status {
        Field::Value(_) => {}
        Field::Null => {
            return Err(WriteError::Validation("status must not be null".to_string()));
        }
        Field::Missing if is_new => {
            return Err(WriteError::Validation(
                "status is required for a new granule".to_string(),
            ));
        }
        Field::Missing => {}
    }

    let created = to_millis(defaults.created_at);
    let now = to_millis(defaults.now);

    if is_new {
        payload.published = payload.published.or_insert_with(|| false);
        payload.error = payload.error.or_insert_with(|| json!({}));
        payload.created_at = payload.created_at.or_insert_with(|| created);
    } else {
        payload.published = payload.published.null_as(|| false);
        payload.error = payload.error.null_as(|| json!({}));
        payload.created_at = payload.created_at.null_as(|| created);
    }
    payload.updated_at = payload.updated_at.or_insert_with(|| now);
    payload.timestamp = payload.timestamp.or_insert_with(|| now);

    if let Field::Value(files) = &payload.files {
        payload.product_volume = Field::Value(product_volume(files));
    }

    Ok(payload)
}

fn required_value<T: Clone>(field: &Field<T>, name: &str) -> Result<T, WriteError> {
    field
        .as_value()
        .cloned()
        .ok_or_else(|| WriteError::Validation(format!("{name} is required")))
}

fn millis(ms: i64) -> Result<DateTime<Utc>, WriteError> {
    from_millis(ms).map_err(|e| WriteError::Validation(e.to_string()))
}

fn apply_millis(field: Field<i64>, current: DateTime<Utc>) -> Result<DateTime<Utc>, WriteError> {
    match field {
        Field::Value(ms) => millis(ms),
        // normalize() has already replaced nulls on timestamp columns
        Field::Null | Field::Missing => Ok(current),
    }
}

/// Merge a normalized payload onto the stored row (or a fresh one).
pub(crate) fn build_record(
    existing: Option<GranuleRecord>,
    granule_id: &str,
    collection_cumulus_id: i64,
    payload: GranulePayload,
    refs: &ResolvedRefs,
) -> Result<GranuleRecord, WriteError> {
    let mut record = match existing {
        Some(record) => record,
        None => GranuleRecord {
            cumulus_id: None,
            granule_id: granule_id.to_string(),
            collection_cumulus_id,
            status: required_value(&payload.status, "status")?,
            execution_cumulus_id: None,
            provider_cumulus_id: None,
            pdr_cumulus_id: None,
            cmr_link: None,
            published: false,
            error: json!({}),
            product_volume: None,
            duration: None,
            time_to_archive: None,
            time_to_preprocess: None,
            beginning_date_time: None,
            ending_date_time: None,
            production_date_time: None,
            last_update_date_time: None,
            query_fields: None,
            created_at: millis(required_value(&payload.created_at, "createdAt")?)?,
            updated_at: millis(required_value(&payload.updated_at, "updatedAt")?)?,
            timestamp: millis(required_value(&payload.timestamp, "timestamp")?)?,
        },
    };

    let GranulePayload {
        status,
        cmr_link,
        published,
        error,
        product_volume,
        duration,
        time_to_archive,
        time_to_preprocess,
        beginning_date_time,
        ending_date_time,
        production_date_time,
        last_update_date_time,
        query_fields,
        created_at,
        updated_at,
        timestamp,
        ..
    } = payload;

    if let Field::Value(status) = status {
        record.status = status;
    }
    record.cmr_link = cmr_link.apply_to(record.cmr_link);
    record.published = published.apply_or(record.published, || false);
    record.error = error.apply_or(record.error, || json!({}));
    record.product_volume = product_volume.apply_to(record.product_volume);
    record.duration = duration.apply_to(record.duration);
    record.time_to_archive = time_to_archive.apply_to(record.time_to_archive);
    record.time_to_preprocess = time_to_preprocess.apply_to(record.time_to_preprocess);
    record.beginning_date_time = beginning_date_time.apply_to(record.beginning_date_time);
    record.ending_date_time = ending_date_time.apply_to(record.ending_date_time);
    record.production_date_time = production_date_time.apply_to(record.production_date_time);
    record.last_update_date_time = last_update_date_time.apply_to(record.last_update_date_time);
    record.query_fields = query_fields.apply_to(record.query_fields);
    record.created_at = apply_millis(created_at, record.created_at)?;
    record.updated_at = apply_millis(updated_at, record.updated_at)?;
    record.timestamp = apply_millis(timestamp, record.timestamp)?;

    record.execution_cumulus_id = refs.execution.clone().apply_to(record.execution_cumulus_id);
    record.provider_cumulus_id = refs.provider.clone().apply_to(record.provider_cumulus_id);
    record.pdr_cumulus_id = refs.pdr.clone().apply_to(record.pdr_cumulus_id);

    Ok(record)
}
