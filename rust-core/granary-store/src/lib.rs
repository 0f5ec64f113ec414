// SPDX-License-Identifier: PMPL-1.0-or-later
//! Granary store seams
//!
//! A granule write touches four collaborators:
//!
//! - [`PrimaryStore`]: the transactional relational store and the only
//!   authority on granule identity.
//! - [`MirrorStore`]: the document mirror, keyed by `granule_id`.
//! - [`IndexStore`]: the search index, keyed by `granule_id` within a
//!   collection.
//! - [`Notifier`]: the downstream pub/sub channel.
//!
//! Neither mirror can join the relational transaction; the writer pairs each
//! mirror write with a compensating action instead. In-memory implementations
//! of every seam live in this crate for tests and benchmarks.

use async_trait::async_trait;
use uuid::Uuid;

use granary_model::{FileRecord, Granule, GranuleNotification, GranuleRecord, Reference, ReferenceKind};

pub mod backend;
pub mod error;
pub mod memory;
pub mod mirror;
pub mod notify;
pub mod relational;
pub mod typed;

pub use backend::StorageBackend;
pub use error::StoreError;
pub use memory::InMemoryBackend;
pub use mirror::{KvDocumentMirror, KvSearchIndex};
pub use notify::{ChannelNotifier, PublishedMessage};
pub use relational::{InMemoryPrimaryStore, InMemoryTransaction};
pub use typed::TypedStore;

/// Relational source of truth.
///
/// Reads outside a transaction see committed state only. Natural-key
/// lookups return `Ok(None)` on a miss; deciding whether a miss is fatal is
/// the caller's business.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PrimaryTransaction>, StoreError>;

    /// Resolve a natural key to an internal id.
    async fn lookup(&self, reference: &Reference) -> Result<Option<i64>, StoreError>;

    /// Natural key for an internal id: the collection id for collections,
    /// the URL for executions, the name for providers and PDRs.
    async fn describe(&self, kind: ReferenceKind, cumulus_id: i64)
        -> Result<Option<String>, StoreError>;

    async fn get_granule(
        &self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError>;

    /// Every row carrying `granule_id`, in any collection.
    async fn granules_by_granule_id(&self, granule_id: &str)
        -> Result<Vec<GranuleRecord>, StoreError>;

    async fn files_for_granule(&self, granule_cumulus_id: i64)
        -> Result<Vec<FileRecord>, StoreError>;

    /// Executions linked to a granule through the join table.
    async fn executions_for_granule(&self, granule_cumulus_id: i64)
        -> Result<Vec<i64>, StoreError>;
}

/// One open relational transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
#[async_trait]
pub trait PrimaryTransaction: Send {
    fn id(&self) -> Uuid;

    /// Hold a row lock on `granule_id` until the transaction ends.
    async fn lock_granule(&mut self, granule_id: &str) -> Result<(), StoreError>;

    async fn get_granule(
        &mut self,
        granule_id: &str,
        collection_cumulus_id: i64,
    ) -> Result<Option<GranuleRecord>, StoreError>;

    async fn granules_by_granule_id(&mut self, granule_id: &str)
        -> Result<Vec<GranuleRecord>, StoreError>;

    /// Insert or update on `(granule_id, collection_cumulus_id)`; returns the
    /// row's internal id.
    async fn upsert_granule(&mut self, record: &GranuleRecord) -> Result<i64, StoreError>;

    async fn files_for_granule(&mut self, granule_cumulus_id: i64)
        -> Result<Vec<FileRecord>, StoreError>;

    /// Insert or update on `(bucket, key, granule_cumulus_id)`.
    async fn upsert_file(&mut self, file: &FileRecord) -> Result<i64, StoreError>;

    async fn delete_file(&mut self, file_cumulus_id: i64) -> Result<(), StoreError>;

    /// Upsert a `(granule, execution)` join row.
    async fn link_execution(
        &mut self,
        granule_cumulus_id: i64,
        execution_cumulus_id: i64,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Document mirror of canonical granules.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get(&self, granule_id: &str) -> Result<Option<Granule>, StoreError>;

    /// Replace the whole record.
    async fn put(&self, granule: &Granule) -> Result<(), StoreError>;

    async fn delete(&self, granule_id: &str) -> Result<bool, StoreError>;
}

/// Search index of canonical granules.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<Option<Granule>, StoreError>;

    /// Replace the whole document.
    async fn upsert(&self, index: &str, granule: &Granule) -> Result<(), StoreError>;

    async fn delete(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<bool, StoreError>;
}

/// Downstream pub/sub channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, notification: &GranuleNotification)
        -> Result<(), StoreError>;
}
