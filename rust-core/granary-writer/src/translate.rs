// SPDX-License-Identifier: PMPL-1.0-or-later
//! Relational record to canonical granule.
//!
//! Both mirrors and every notification receive the output of
//! [`to_canonical`], so cross-store equality holds by construction.

use granary_model::{to_millis, FileRecord, Granule, GranuleRecord, ReferenceKind};
use granary_store::{PrimaryStore, StoreError};

async fn describe(
    primary: &dyn PrimaryStore,
    kind: ReferenceKind,
    id: Option<i64>,
) -> Result<Option<String>, StoreError> {
    match id {
        Some(id) => primary.describe(kind, id).await,
        None => Ok(None),
    }
}

/// Build the canonical shape of `record` with `files` as its children.
pub(crate) async fn to_canonical(
    primary: &dyn PrimaryStore,
    record: &GranuleRecord,
    files: &[FileRecord],
) -> Result<Granule, StoreError> {
    let collection_id = primary
        .describe(ReferenceKind::Collection, record.collection_cumulus_id)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!(
                "collections/{}",
                record.collection_cumulus_id
            ))
        })?;

    let execution = describe(primary, ReferenceKind::Execution, record.execution_cumulus_id).await?;
    let provider = describe(primary, ReferenceKind::Provider, record.provider_cumulus_id).await?;
    let pdr_name = describe(primary, ReferenceKind::Pdr, record.pdr_cumulus_id).await?;

    let mut files: Vec<_> = files.iter().map(FileRecord::to_file).collect();
    files.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key)));

    Ok(Granule {
        granule_id: record.granule_id.clone(),
        collection_id,
        status: record.status,
        execution,
        provider,
        pdr_name,
        cmr_link: record.cmr_link.clone(),
        published: record.published,
        error: record.error.clone(),
        product_volume: record.product_volume,
        duration: record.duration,
        time_to_archive: record.time_to_archive,
        time_to_preprocess: record.time_to_preprocess,
        beginning_date_time: record.beginning_date_time.clone(),
        ending_date_time: record.ending_date_time.clone(),
        production_date_time: record.production_date_time.clone(),
        last_update_date_time: record.last_update_date_time.clone(),
        query_fields: record.query_fields.clone(),
        created_at: to_millis(record.created_at),
        updated_at: to_millis(record.updated_at),
        timestamp: to_millis(record.timestamp),
        files: (!files.is_empty()).then_some(files),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use granary_model::{GranuleFile, GranuleStatus};
    use granary_store::InMemoryPrimaryStore;
    use serde_json::json;

    fn record(collection: i64) -> GranuleRecord {
        let now = Utc::now();
        GranuleRecord {
            cumulus_id: Some(1),
            granule_id: "g1".to_string(),
            collection_cumulus_id: collection,
            status: GranuleStatus::Completed,
            execution_cumulus_id: None,
            provider_cumulus_id: None,
            pdr_cumulus_id: None,
            cmr_link: Some("https://cmr/g1".to_string()),
            published: true,
            error: json!({}),
            product_volume: Some(3),
            duration: None,
            time_to_archive: None,
            time_to_preprocess: None,
            beginning_date_time: None,
            ending_date_time: None,
            production_date_time: None,
            last_update_date_time: None,
            query_fields: None,
            created_at: now,
            updated_at: now,
            timestamp: now,
        }
    }

    #[tokio::test]
    async fn test_references_become_natural_keys() {
        let store = InMemoryPrimaryStore::new();
        let collection = store.register_collection("MOD09GQ", "006").await;
        let execution = store
            .register_execution("arn:exec:1", "https://console/exec/1")
            .await;
        let provider = store.register_provider("s3-provider").await;

        let mut row = record(collection);
        row.execution_cumulus_id = Some(execution);
        row.provider_cumulus_id = Some(provider);

        let granule = to_canonical(&store, &row, &[]).await.unwrap();
        assert_eq!(granule.collection_id, "MOD09GQ___006");
        assert_eq!(granule.execution.as_deref(), Some("https://console/exec/1"));
        assert_eq!(granule.provider.as_deref(), Some("s3-provider"));
        assert_eq!(granule.pdr_name, None);
        assert_eq!(granule.files, None);
        assert_eq!(granule.created_at, to_millis(row.created_at));
    }

    #[tokio::test]
    async fn test_files_sorted_by_location() {
        let store = InMemoryPrimaryStore::new();
        let collection = store.register_collection("c", "1").await;
        let files = vec![
            FileRecord::from_file(1, &GranuleFile::new("b", "z")),
            FileRecord::from_file(1, &GranuleFile::new("a", "y")),
            FileRecord::from_file(1, &GranuleFile::new("b", "a")),
        ];

        let granule = to_canonical(&store, &record(collection), &files).await.unwrap();
        let keys: Vec<_> = granule
            .files
            .unwrap()
            .into_iter()
            .map(|f| format!("{}/{}", f.bucket.unwrap(), f.key.unwrap()))
            .collect();
        assert_eq!(keys, vec!["a/y", "b/a", "b/z"]);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let store = InMemoryPrimaryStore::new();
        assert!(matches!(
            to_canonical(&store, &record(99), &[]).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
