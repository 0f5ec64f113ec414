// SPDX-License-Identifier: PMPL-1.0-or-later
//! Foreign-key resolution.
//!
//! Natural keys become internal ids before any transaction opens. An
//! optional reference that misses is "not applicable" and drops out of the
//! write; a required one that misses is [`WriteError::RecordDoesNotExist`].

use serde::{Deserialize, Serialize};
use tracing::info;

use granary_model::{Field, Reference};
use granary_store::PrimaryStore;

use crate::error::WriteError;
use crate::normalizer::GranuleKey;

/// Reference columns for one granule write, with the same omit/null/value
/// semantics as payload fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ResolvedRefs {
    pub execution: Field<i64>,
    pub provider: Field<i64>,
    pub pdr: Field<i64>,
}

/// Workflow-level references, resolved once per batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub execution_cumulus_id: Option<i64>,
    pub provider_cumulus_id: Option<i64>,
    pub pdr_cumulus_id: Option<i64>,
    pub parent_execution_cumulus_id: Option<i64>,
    pub async_operation_cumulus_id: Option<i64>,
}

impl ResolvedContext {
    /// Optional misses are simply left out of the write.
    pub(crate) fn refs(&self) -> ResolvedRefs {
        let field = |id: Option<i64>| id.map(Field::Value).unwrap_or(Field::Missing);
        ResolvedRefs {
            execution: field(self.execution_cumulus_id),
            provider: field(self.provider_cumulus_id),
            pdr: field(self.pdr_cumulus_id),
        }
    }
}

pub(crate) struct Resolver<'a> {
    primary: &'a dyn PrimaryStore,
}

impl<'a> Resolver<'a> {
    pub fn new(primary: &'a dyn PrimaryStore) -> Self {
        Self { primary }
    }

    pub async fn required(&self, reference: &Reference) -> Result<i64, WriteError> {
        self.primary
            .lookup(reference)
            .await?
            .ok_or_else(|| WriteError::missing(reference.kind(), reference.natural_key()))
    }

    pub async fn optional(&self, reference: Option<Reference>) -> Result<Option<i64>, WriteError> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        let found = self.primary.lookup(&reference).await?;
        if found.is_none() {
            info!(
                kind = %reference.kind(),
                key = %reference.natural_key(),
                "reference not found, skipping"
            );
        }
        Ok(found)
    }

    /// A reference the caller named explicitly: a value must resolve, `null`
    /// clears the column, omission leaves it untouched.
    pub async fn explicit(&self, reference: Field<Reference>) -> Result<Field<i64>, WriteError> {
        match reference {
            Field::Value(reference) => Ok(Field::Value(self.required(&reference).await?)),
            Field::Null => Ok(Field::Null),
            Field::Missing => Ok(Field::Missing),
        }
    }

    pub async fn collection(&self, key: &GranuleKey) -> Result<i64, WriteError> {
        self.required(&Reference::Collection {
            name: key.collection_name.clone(),
            version: key.collection_version.clone(),
        })
        .await
    }

    /// Look up the collection for a bare collection id.
    pub async fn collection_id(&self, collection_id: &str) -> Result<i64, WriteError> {
        let (name, version) = granary_model::deconstruct_collection_id(collection_id)
            .map_err(|e| WriteError::Validation(e.to_string()))?;
        self.required(&Reference::Collection { name, version }).await
    }
}
