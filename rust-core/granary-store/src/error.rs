// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store error types.
//
// One enum shared by the relational primary, the two mirrors and the
// notifier, so the writer can wrap any store failure uniformly.

use thiserror::Error;

/// Errors raised by any granule store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A row violated a table constraint (NOT NULL, unique key).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The store could not be reached or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_null(table: &str, column: &str) -> Self {
        StoreError::Constraint(format!(
            "null value in column \"{column}\" of relation \"{table}\" violates not-null constraint"
        ))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
