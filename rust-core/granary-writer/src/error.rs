// SPDX-License-Identifier: PMPL-1.0-or-later
//! Writer error taxonomy.

use thiserror::Error;

use granary_store::StoreError;

/// Errors returned by the write entry points.
///
/// `Validation`, `RecordDoesNotExist` and `Conflict` are raised before any
/// store write. `Transaction` means the write was rolled back and every
/// mirror compensated. `CompensationFailed` means it was not; the mirrors may
/// hold state the primary does not and need external reconciliation.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("RecordDoesNotExist: no {kind} record for {key}")]
    RecordDoesNotExist { kind: String, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A malformed workflow message; retrying it cannot succeed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to write granule {granule_id}: {source}")]
    Transaction {
        granule_id: String,
        #[source]
        source: StoreError,
    },

    #[error(
        "Compensation failed for granule {granule_id} ({} failure(s)) after: {cause}",
        .failures.len()
    )]
    CompensationFailed {
        granule_id: String,
        cause: Box<WriteError>,
        failures: Vec<StoreError>,
    },

    #[error("{failed} of {total} granule writes failed")]
    Batch {
        failed: usize,
        total: usize,
        failures: Vec<(String, WriteError)>,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WriteError {
    pub(crate) fn transaction(granule_id: &str, source: StoreError) -> Self {
        WriteError::Transaction {
            granule_id: granule_id.to_string(),
            source,
        }
    }

    pub(crate) fn missing(kind: impl ToString, key: impl Into<String>) -> Self {
        WriteError::RecordDoesNotExist {
            kind: kind.to_string(),
            key: key.into(),
        }
    }

    /// Short class name, used as the `Error` label of a recorded failure.
    pub fn label(&self) -> &'static str {
        match self {
            WriteError::Validation(_) => "ValidationError",
            WriteError::RecordDoesNotExist { .. } => "RecordDoesNotExist",
            WriteError::Conflict(_) => "ConflictError",
            WriteError::InvalidMessage(_) => "InvalidMessageError",
            WriteError::Transaction { .. } => "TransactionError",
            WriteError::CompensationFailed { .. } => "CompensationFailedError",
            WriteError::Batch { .. } => "AggregateError",
            WriteError::Store(_) => "StoreError",
        }
    }

    /// Whether a retry of the same input could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WriteError::Transaction { .. } | WriteError::Store(_) => true,
            WriteError::Batch { failures, .. } => failures.iter().any(|(_, e)| e.is_retryable()),
            _ => false,
        }
    }
}
