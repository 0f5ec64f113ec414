// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory key-value backend.
//
// A `BTreeMap` behind a tokio `RwLock`; ordering gives prefix scans for free.
// Clones share the same map, which lets a mirror and a test inspect one
// backend concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let map = self.data.read().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = InMemoryBackend::new();
        backend.put(b"mirror:g1", b"{}").await.unwrap();
        assert_eq!(backend.get(b"mirror:g1").await.unwrap(), Some(b"{}".to_vec()));

        assert!(backend.delete(b"mirror:g1").await.unwrap());
        assert!(!backend.delete(b"mirror:g1").await.unwrap());
        assert!(backend.get(b"mirror:g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered_and_bounded() {
        let backend = InMemoryBackend::new();
        backend.put(b"idx:c___1/g2", b"2").await.unwrap();
        backend.put(b"idx:c___1/g1", b"1").await.unwrap();
        backend.put(b"idx:c___2/g1", b"3").await.unwrap();
        backend.put(b"other:g1", b"4").await.unwrap();

        let hits = backend.scan_prefix(b"idx:c___1/", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, b"idx:c___1/g1".to_vec());

        assert_eq!(backend.scan_prefix(b"idx:", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = InMemoryBackend::new();
        let view = backend.clone();
        backend.put(b"k", b"v").await.unwrap();
        assert_eq!(view.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        view.delete(b"k").await.unwrap();
        assert!(backend.scan_prefix(b"", usize::MAX).await.unwrap().is_empty());
    }
}
