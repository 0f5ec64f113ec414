// SPDX-License-Identifier: PMPL-1.0-or-later
//! File-set reconciliation inside the granule transaction.
//!
//! The incoming list replaces the stored set: listed files are upserted on
//! `(bucket, key, granule)`, stored files missing from the list are deleted.
//! A file the store rejects is collected as a [`FileFailure`] instead of
//! aborting the set; the caller degrades the granule to `failed`.

use std::collections::HashSet;

use tracing::{debug, warn};

use granary_model::{ErrorEntry, FileRecord, GranuleFile};
use granary_store::{PrimaryTransaction, StoreError};

#[derive(Debug, Clone)]
pub(crate) struct FileFailure {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub(crate) struct FileOutcome {
    pub written: usize,
    pub deleted: usize,
    pub failures: Vec<FileFailure>,
}

impl FileOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    /// One error entry summarising every failed file.
    pub fn aggregate_error(&self, store_label: &str) -> ErrorEntry {
        let detail: Vec<String> = self
            .failures
            .iter()
            .map(|f| {
                format!(
                    "{}/{}: {}",
                    f.bucket.as_deref().unwrap_or("<no bucket>"),
                    f.key.as_deref().unwrap_or("<no key>"),
                    f.error
                )
            })
            .collect();
        ErrorEntry::new(
            format!("Failed writing files to {store_label}."),
            format!("AggregateError: {}", detail.join("\n")),
        )
    }
}

/// Replace the stored file set of `granule_cumulus_id` with `files`.
///
/// Errors reading or deleting existing rows abort the transaction; errors
/// writing an individual new file do not.
pub(crate) async fn reconcile(
    txn: &mut dyn PrimaryTransaction,
    granule_cumulus_id: i64,
    files: &[GranuleFile],
) -> Result<FileOutcome, StoreError> {
    let existing = txn.files_for_granule(granule_cumulus_id).await?;
    let mut outcome = FileOutcome::default();

    let requested: HashSet<(Option<&str>, Option<&str>)> = files
        .iter()
        .map(|f| (f.bucket.as_deref(), f.key.as_deref()))
        .collect();

    for file in files {
        let record = FileRecord::from_file(granule_cumulus_id, file);
        match txn.upsert_file(&record).await {
            Ok(_) => outcome.written += 1,
            Err(error) => {
                warn!(
                    granule_cumulus_id,
                    bucket = ?file.bucket,
                    key = ?file.key,
                    %error,
                    "file write failed"
                );
                outcome.failures.push(FileFailure {
                    bucket: file.bucket.clone(),
                    key: file.key.clone(),
                    error,
                });
            }
        }
    }

    for stale in existing
        .iter()
        .filter(|f| !requested.contains(&(f.bucket.as_deref(), f.key.as_deref())))
    {
        if let Some(id) = stale.cumulus_id {
            txn.delete_file(id).await?;
            outcome.deleted += 1;
        }
    }

    debug!(
        granule_cumulus_id,
        written = outcome.written,
        deleted = outcome.deleted,
        failed = outcome.failures.len(),
        "files reconciled"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use granary_model::{GranuleRecord, GranuleStatus};
    use granary_store::{InMemoryPrimaryStore, PrimaryStore};

    async fn granule(store: &InMemoryPrimaryStore, txn: &mut dyn PrimaryTransaction) -> i64 {
        let collection = store.register_collection("c", "1").await;
        let now = Utc::now();
        txn.upsert_granule(&GranuleRecord {
            cumulus_id: None,
            granule_id: "g1".to_string(),
            collection_cumulus_id: collection,
            status: GranuleStatus::Completed,
            execution_cumulus_id: None,
            provider_cumulus_id: None,
            pdr_cumulus_id: None,
            cmr_link: None,
            published: false,
            error: serde_json::json!({}),
            product_volume: None,
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
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_replace_deletes_stale_files() {
        let store = InMemoryPrimaryStore::new();
        let mut txn = store.begin().await.unwrap();
        let id = granule(&store, txn.as_mut()).await;

        let first = vec![GranuleFile::new("b", "a"), GranuleFile::new("b", "b")];
        reconcile(txn.as_mut(), id, &first).await.unwrap();

        let second = vec![GranuleFile::new("b", "b"), GranuleFile::new("b", "c")];
        let outcome = reconcile(txn.as_mut(), id, &second).await.unwrap();
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.deleted, 1);

        let keys: Vec<_> = txn
            .files_for_granule(id)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|f| f.key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_list_clears_files() {
        let store = InMemoryPrimaryStore::new();
        let mut txn = store.begin().await.unwrap();
        let id = granule(&store, txn.as_mut()).await;

        reconcile(txn.as_mut(), id, &[GranuleFile::new("b", "a")]).await.unwrap();
        let outcome = reconcile(txn.as_mut(), id, &[]).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(txn.files_for_granule(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_files_are_isolated() {
        let store = InMemoryPrimaryStore::new();
        let mut txn = store.begin().await.unwrap();
        let id = granule(&store, txn.as_mut()).await;

        let mut no_bucket = GranuleFile::new("b", "broken");
        no_bucket.bucket = None;
        let files = vec![GranuleFile::new("b", "ok"), no_bucket];

        let outcome = reconcile(txn.as_mut(), id, &files).await.unwrap();
        assert_eq!(outcome.written, 1);
        assert!(outcome.is_degraded());

        let entry = outcome.aggregate_error("PostgreSQL");
        assert_eq!(entry.error, "Failed writing files to PostgreSQL.");
        let cause = entry.cause.as_str().unwrap();
        assert!(cause.starts_with("AggregateError: "));
        assert!(cause.contains("<no bucket>/broken"));
    }
}
