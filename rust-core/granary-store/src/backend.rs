// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key-value backend underneath the document mirror and the search index.
//
// Neither mirror takes part in a transaction, so the contract is plain
// single-key reads and writes plus an ordered prefix scan.

use async_trait::async_trait;

use crate::error::StoreError;

/// An opaque byte-keyed store, shareable across tokio tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Up to `limit` pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Used in log fields.
    fn name(&self) -> &str;
}
