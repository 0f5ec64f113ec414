// SPDX-License-Identifier: PMPL-1.0-or-later
//! Compensation log for the non-transactional mirrors.
//!
//! Each successful mirror write pushes the action that undoes it. On a
//! failure path the log is unwound newest-first; every step runs even when
//! an earlier one fails, and the failures are returned together.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error};

use granary_store::StoreError;

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), StoreError>> + Send>;

/// Stack of undo actions built up as mirror writes succeed.
#[derive(Default)]
pub struct CompensationLog {
    steps: Vec<(String, Compensation)>,
}

/// What an unwind did.
#[derive(Debug, Default)]
pub struct UnwindReport {
    pub executed: usize,
    pub failures: Vec<StoreError>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the undo action for a write that just succeeded.
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        self.steps.push((label.into(), Box::new(move || step().boxed())));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Labels in push order.
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Run every compensation, newest first.
    pub async fn unwind(self) -> UnwindReport {
        let mut report = UnwindReport::default();
        for (label, step) in self.steps.into_iter().rev() {
            report.executed += 1;
            match step().await {
                Ok(()) => debug!(step = %label, "compensation applied"),
                Err(e) => {
                    error!(step = %label, error = %e, "compensation failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }
}
