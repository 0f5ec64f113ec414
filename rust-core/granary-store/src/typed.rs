// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serde-typed namespace over a `StorageBackend`.
//
// Values are stored as JSON under `"{namespace}:{key}"`, so several logical
// stores (the document mirror, one namespace per search index) can share a
// single backend.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::StoreError;

pub struct TypedStore<B: StorageBackend> {
    backend: B,
    namespace: String,
}

impl<B: StorageBackend> TypedStore<B> {
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn prefixed_key(&self, key: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, key).into_bytes()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(&self.prefixed_key(key)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                StoreError::Serialization(format!("failed to decode '{key}': {err}"))
            }),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|err| {
            StoreError::Serialization(format!("failed to encode '{key}': {err}"))
        })?;
        self.backend.put(&self.prefixed_key(key), &bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.backend.delete(&self.prefixed_key(key)).await
    }

    /// Decoded entries under `key_prefix`, keyed by their logical key.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let namespace_len = self.namespace.len() + 1;
        let raw = self
            .backend
            .scan_prefix(&self.prefixed_key(key_prefix), limit)
            .await?;

        raw.into_iter()
            .map(|(raw_key, raw_value)| {
                let key = String::from_utf8_lossy(&raw_key[namespace_len.min(raw_key.len())..])
                    .to_string();
                let value = serde_json::from_slice(&raw_value).map_err(|err| {
                    StoreError::Serialization(format!("failed to decode '{key}': {err}"))
                })?;
                Ok((key, value))
            })
            .collect()
    }
}
