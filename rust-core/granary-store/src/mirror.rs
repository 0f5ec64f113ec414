// SPDX-License-Identifier: PMPL-1.0-or-later
//! Key-value backed document mirror and search index.

use async_trait::async_trait;
use tracing::debug;

use granary_model::Granule;

use crate::backend::StorageBackend;
use crate::error::StoreError;
use crate::typed::TypedStore;
use crate::{IndexStore, MirrorStore};

/// Namespace holding mirror documents.
pub const MIRROR_NAMESPACE: &str = "mirror";

/// Prefix of every search-index namespace. Distinct from
/// [`MIRROR_NAMESPACE`], so a mirror and an index sharing a backend never
/// scan each other's documents whatever the index is called.
pub const INDEX_NAMESPACE_PREFIX: &str = "index";

/// Document mirror storing one JSON document per `granule_id`.
pub struct KvDocumentMirror<B: StorageBackend> {
    store: TypedStore<B>,
}

impl<B: StorageBackend> KvDocumentMirror<B> {
    pub fn new(backend: B) -> Self {
        Self {
            store: TypedStore::new(backend, MIRROR_NAMESPACE),
        }
    }

    /// Every mirrored granule, in `granule_id` order.
    pub async fn all(&self) -> Result<Vec<Granule>, StoreError> {
        let entries = self.store.scan_prefix::<Granule>("", usize::MAX).await?;
        Ok(entries.into_iter().map(|(_, granule)| granule).collect())
    }
}

#[async_trait]
impl<B: StorageBackend> MirrorStore for KvDocumentMirror<B> {
    async fn get(&self, granule_id: &str) -> Result<Option<Granule>, StoreError> {
        self.store.get(granule_id).await
    }

    async fn put(&self, granule: &Granule) -> Result<(), StoreError> {
        debug!(granule_id = %granule.granule_id, backend = self.store.backend().name(), "mirror put");
        self.store.put(&granule.granule_id, granule).await
    }

    async fn delete(&self, granule_id: &str) -> Result<bool, StoreError> {
        debug!(granule_id, "mirror delete");
        self.store.delete(granule_id).await
    }
}

/// Search index with one namespace (`index:{name}`) per index name.
///
/// Documents are keyed `{collection_id}/{granule_id}` so the same
/// `granule_id` in two collections never collides.
pub struct KvSearchIndex<B: StorageBackend + Clone> {
    backend: B,
}

impl<B: StorageBackend + Clone> KvSearchIndex<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn index(&self, index: &str) -> TypedStore<B> {
        TypedStore::new(
            self.backend.clone(),
            &format!("{INDEX_NAMESPACE_PREFIX}:{index}"),
        )
    }

    fn doc_key(granule_id: &str, collection_id: &str) -> String {
        format!("{collection_id}/{granule_id}")
    }

    /// Every document in `index`, in key order.
    pub async fn all(&self, index: &str) -> Result<Vec<Granule>, StoreError> {
        let entries = self.index(index).scan_prefix::<Granule>("", usize::MAX).await?;
        Ok(entries.into_iter().map(|(_, granule)| granule).collect())
    }
}

#[async_trait]
impl<B: StorageBackend + Clone> IndexStore for KvSearchIndex<B> {
    async fn get(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<Option<Granule>, StoreError> {
        self.index(index)
            .get(&Self::doc_key(granule_id, collection_id))
            .await
    }

    async fn upsert(&self, index: &str, granule: &Granule) -> Result<(), StoreError> {
        debug!(index, granule_id = %granule.granule_id, "index upsert");
        self.index(index)
            .put(&Self::doc_key(&granule.granule_id, &granule.collection_id), granule)
            .await
    }

    async fn delete(
        &self,
        index: &str,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<bool, StoreError> {
        debug!(index, granule_id, "index delete");
        self.index(index)
            .delete(&Self::doc_key(granule_id, collection_id))
            .await
    }
}
