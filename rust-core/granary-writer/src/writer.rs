// SPDX-License-Identifier: PMPL-1.0-or-later
//! Core granule writer.
//!
//! One write is a saga around a relational transaction:
//!
//! 1. lock the granule row, re-check identity, read the current row
//! 2. apply the status guard, normalize, upsert the row and its files
//! 3. translate to the canonical shape and write the document mirror, then
//!    the search index, pushing a compensation for each
//! 4. commit, then publish the notification
//!
//! A failure in 1-3 rolls the transaction back and unwinds the compensation
//! log. A failed commit unwinds the log too. Nothing is published on any
//! failure path.

use std::sync::Arc;

use prometheus::Registry;
use tracing::{debug, error, info, instrument, warn};

use granary_model::{
    append_error, EventType, Field, Granule, GranuleNotification, GranulePayload, GranuleRecord,
    GranuleStatus,
};
use granary_store::{IndexStore, MirrorStore, Notifier, PrimaryStore, PrimaryTransaction, StoreError};

use crate::config::{ConfigError, WriterConfig};
use crate::error::WriteError;
use crate::files;
use crate::metrics::WriterMetrics;
use crate::normalizer::{build_record, normalize, Defaults, GranuleKey};
use crate::resolver::ResolvedRefs;
use crate::saga::CompensationLog;
use crate::translate::to_canonical;

/// Everything the core writer needs for one granule, already validated and
/// resolved.
#[derive(Debug, Clone)]
pub(crate) struct WriteInput {
    pub payload: GranulePayload,
    pub key: GranuleKey,
    pub collection_cumulus_id: i64,
    pub refs: ResolvedRefs,
    /// Caller-chosen event; derived from newness when `None`.
    pub event: Option<EventType>,
    pub defaults: Defaults,
}

/// Result of one committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    /// Canonical record as written to both mirrors and published.
    pub granule: Granule,
    pub event: EventType,
    /// The status guard kept a terminal status.
    pub status_suppressed: bool,
    /// Files the primary store rejected.
    pub file_failures: usize,
}

/// The granule write-consistency engine.
#[derive(Clone)]
pub struct GranuleWriter {
    config: WriterConfig,
    pub(crate) primary: Arc<dyn PrimaryStore>,
    mirror: Arc<dyn MirrorStore>,
    index: Arc<dyn IndexStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Option<WriterMetrics>,
}

/// A late `running` write from the execution that already finished the
/// granule must not reopen it. Returns whether the guard fired.
fn apply_status_guard(
    existing: Option<&GranuleRecord>,
    payload: &mut GranulePayload,
    refs: &mut ResolvedRefs,
) -> bool {
    let Some(existing) = existing else {
        return false;
    };
    let same_execution = matches!(
        (&refs.execution, existing.execution_cumulus_id),
        (Field::Value(incoming), Some(current)) if *incoming == current
    );
    let late_running = payload.status == Field::Value(GranuleStatus::Running);

    if late_running && existing.status.is_final() && same_execution {
        // The error describes the terminal outcome and stays with it.
        payload.status = Field::Missing;
        payload.error = Field::Missing;
        refs.execution = Field::Missing;
        true
    } else {
        false
    }
}

/// `granule_id` is unique across collections.
fn check_identity(
    rows: &[GranuleRecord],
    key: &GranuleKey,
    collection_cumulus_id: i64,
) -> Result<(), WriteError> {
    if rows
        .iter()
        .any(|row| row.collection_cumulus_id != collection_cumulus_id)
    {
        return Err(WriteError::Conflict(format!(
            "A granule already exists for granuleId: {} with a collectionId other than {}",
            key.granule_id, key.collection_id
        )));
    }
    Ok(())
}

struct Staged {
    granule: Granule,
    event: EventType,
    status_suppressed: bool,
    file_failures: usize,
}

impl GranuleWriter {
    /// Build a writer; invalid configuration fails here, not per call.
    pub fn new(
        config: WriterConfig,
        primary: Arc<dyn PrimaryStore>,
        mirror: Arc<dyn MirrorStore>,
        index: Arc<dyn IndexStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            primary,
            mirror,
            index,
            notifier,
            metrics: None,
        })
    }

    /// Register write counters on `registry`.
    pub fn with_metrics(mut self, registry: &Registry) -> Result<Self, ConfigError> {
        self.metrics = Some(WriterMetrics::register(registry)?);
        Ok(self)
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&WriterMetrics> {
        self.metrics.as_ref()
    }

    #[instrument(
        skip(self, input),
        fields(granule_id = %input.key.granule_id, collection_id = %input.key.collection_id)
    )]
    pub(crate) async fn write(&self, input: WriteInput) -> Result<WriteReport, WriteError> {
        let granule_id = input.key.granule_id.clone();

        // Reject before opening anything; re-checked under the row lock.
        let rows = self.primary.granules_by_granule_id(&granule_id).await?;
        check_identity(&rows, &input.key, input.collection_cumulus_id)?;

        let mut txn = self
            .primary
            .begin()
            .await
            .map_err(|e| WriteError::transaction(&granule_id, e))?;
        debug!(transaction = %txn.id(), "transaction opened");

        let mut log = CompensationLog::new();
        let attempted = self.attempt(txn.as_mut(), input, &mut log).await;
        let staged = match attempted {
            Ok(staged) => staged,
            Err(cause) => {
                let mut failures = Vec::new();
                if let Err(e) = txn.rollback().await {
                    error!(error = %e, "rollback failed");
                    failures.push(e);
                }
                return Err(self.settle(&granule_id, log, failures, cause).await);
            }
        };

        if let Err(e) = txn.commit().await {
            let cause = WriteError::transaction(&granule_id, e);
            return Err(self.settle(&granule_id, log, Vec::new(), cause).await);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_written(staged.event);
            if staged.file_failures > 0 {
                metrics.record_degraded_files();
            }
        }
        info!(
            event = %staged.event,
            status = %staged.granule.status,
            suppressed = staged.status_suppressed,
            "granule written (transaction committed)"
        );

        let granule = self.notify(staged.granule, staged.event).await;
        Ok(WriteReport {
            granule,
            event: staged.event,
            status_suppressed: staged.status_suppressed,
            file_failures: staged.file_failures,
        })
    }

    /// Steps 1-3. Store failures are wrapped as `Transaction` errors; the
    /// caller owns rollback and compensation.
    async fn attempt(
        &self,
        txn: &mut dyn PrimaryTransaction,
        input: WriteInput,
        log: &mut CompensationLog,
    ) -> Result<Staged, WriteError> {
        let WriteInput {
            mut payload,
            key,
            collection_cumulus_id,
            mut refs,
            event,
            defaults,
        } = input;
        let granule_id = key.granule_id.as_str();
        let store = |e: StoreError| WriteError::transaction(granule_id, e);

        txn.lock_granule(granule_id).await.map_err(store)?;
        let rows = txn.granules_by_granule_id(granule_id).await.map_err(store)?;
        check_identity(&rows, &key, collection_cumulus_id)?;

        let existing = txn
            .get_granule(granule_id, collection_cumulus_id)
            .await
            .map_err(store)?;
        let is_new = existing.is_none();

        let link = refs.execution.as_value().copied();
        let status_suppressed = apply_status_guard(existing.as_ref(), &mut payload, &mut refs);
        if status_suppressed {
            info!("late running write for a finished execution; keeping terminal status");
        }

        let mut payload = normalize(payload, is_new, &defaults)?;
        let incoming_files = std::mem::take(&mut payload.files);
        let mut record = build_record(existing, granule_id, collection_cumulus_id, payload, &refs)?;

        let granule_cumulus_id = txn.upsert_granule(&record).await.map_err(store)?;
        record.cumulus_id = Some(granule_cumulus_id);

        if let Some(execution) = link {
            txn.link_execution(granule_cumulus_id, execution)
                .await
                .map_err(store)?;
        }

        let mut file_failures = 0;
        if let Field::Value(incoming) = &incoming_files {
            let outcome = files::reconcile(&mut *txn, granule_cumulus_id, incoming)
                .await
                .map_err(store)?;
            if outcome.is_degraded() {
                file_failures = outcome.failures.len();
                warn!(failed = file_failures, "granule written with failed files; marking failed");
                record.status = GranuleStatus::Failed;
                record.error = append_error(
                    &record.error,
                    outcome.aggregate_error(&self.config.file_store_label),
                );
                txn.upsert_granule(&record).await.map_err(store)?;
            }
        }

        let file_rows = txn
            .files_for_granule(granule_cumulus_id)
            .await
            .map_err(store)?;
        let granule = to_canonical(self.primary.as_ref(), &record, &file_rows)
            .await
            .map_err(store)?;

        self.write_mirror(&granule, log).await.map_err(store)?;
        self.write_index(&granule, log).await.map_err(store)?;

        Ok(Staged {
            granule,
            event: event.unwrap_or(if is_new {
                EventType::Create
            } else {
                EventType::Update
            }),
            status_suppressed,
            file_failures,
        })
    }

    async fn write_mirror(
        &self,
        granule: &Granule,
        log: &mut CompensationLog,
    ) -> Result<(), StoreError> {
        let previous = self.mirror.get(&granule.granule_id).await?;
        self.mirror.put(granule).await?;

        let mirror = Arc::clone(&self.mirror);
        let granule_id = granule.granule_id.clone();
        log.push(format!("document mirror {granule_id}"), move || async move {
            match previous {
                Some(previous) => mirror.put(&previous).await,
                None => mirror.delete(&granule_id).await.map(|_| ()),
            }
        });
        Ok(())
    }

    async fn write_index(
        &self,
        granule: &Granule,
        log: &mut CompensationLog,
    ) -> Result<(), StoreError> {
        let index_name = self.config.search_index.clone();
        let previous = self
            .index
            .get(&index_name, &granule.granule_id, &granule.collection_id)
            .await?;
        self.index.upsert(&index_name, granule).await?;

        let index = Arc::clone(&self.index);
        let granule_id = granule.granule_id.clone();
        let collection_id = granule.collection_id.clone();
        log.push(format!("search index {granule_id}"), move || async move {
            match previous {
                Some(previous) => index.upsert(&index_name, &previous).await,
                None => index
                    .delete(&index_name, &granule_id, &collection_id)
                    .await
                    .map(|_| ()),
            }
        });
        Ok(())
    }

    /// Unwind the compensation log after a failed attempt and decide which
    /// error the caller sees.
    async fn settle(
        &self,
        granule_id: &str,
        log: CompensationLog,
        mut failures: Vec<StoreError>,
        cause: WriteError,
    ) -> WriteError {
        let report = log.unwind().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_failure();
            metrics.record_compensations(report.executed, report.failures.len());
        }
        failures.extend(report.failures);

        if failures.is_empty() {
            warn!(
                error = %cause,
                compensations = report.executed,
                "granule write rolled back"
            );
            return cause;
        }

        error!(
            error = %cause,
            failed = failures.len(),
            "compensation failed; mirrors need external reconciliation"
        );
        WriteError::CompensationFailed {
            granule_id: granule_id.to_string(),
            cause: Box::new(cause),
            failures,
        }
    }

    /// Publish after commit. Delivery failures are logged, never returned.
    async fn notify(&self, granule: Granule, event: EventType) -> Granule {
        let notification = GranuleNotification {
            record: granule,
            event,
        };
        if let Err(e) = self
            .notifier
            .publish(&self.config.notification_topic, &notification)
            .await
        {
            warn!(
                topic = %self.config.notification_topic,
                error = %e,
                "notification publish failed after commit"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_notification_failure();
            }
        }
        notification.record
    }
}
