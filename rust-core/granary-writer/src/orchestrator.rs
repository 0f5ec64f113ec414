// SPDX-License-Identifier: PMPL-1.0-or-later
//! Public write entry points.
//!
//! The message path writes every granule of a workflow event concurrently
//! with shared, once-resolved context. The API path writes one granule with
//! caller-chosen event type and explicit references. The status helpers at
//! the bottom patch an existing granule through the same core writer.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use granary_model::{
    append_error, from_millis, to_millis, ErrorEntry, EventType, Field, Granule, GranulePayload,
    GranuleStatus, Reference,
};

use crate::error::WriteError;
use crate::normalizer::{validate, Defaults};
use crate::resolver::{ResolvedContext, ResolvedRefs, Resolver};
use crate::translate::to_canonical;
use crate::writer::{GranuleWriter, WriteInput, WriteReport};

/// Context shared by every granule of one workflow event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowContext {
    /// Execution URL
    pub execution: Option<String>,
    pub execution_arn: Option<String>,
    pub provider: Option<String>,
    /// PDR name
    pub pdr: Option<String>,
    /// Epoch milliseconds; required whenever the event carries granules.
    pub workflow_start_time: Option<i64>,
    pub status: Option<GranuleStatus>,
    pub parent_execution_arn: Option<String>,
    pub async_operation_id: Option<String>,
    /// Workflow exception, used as the granule error on `failed`.
    pub exception: Option<Value>,
}

/// A granule as carried in a workflow event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageGranule {
    #[serde(flatten)]
    pub payload: GranulePayload,
    /// Milliseconds spent syncing the granule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_granule_duration: Option<u64>,
    /// Milliseconds spent publishing to the catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_to_cmr_duration: Option<u64>,
}

impl From<GranulePayload> for MessageGranule {
    fn from(payload: GranulePayload) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }
}

/// A workflow event carrying zero or more granules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMessage {
    #[serde(default)]
    pub granules: Vec<MessageGranule>,
    #[serde(rename = "commonContext", default)]
    pub context: WorkflowContext,
}

/// Every granule of the batch was committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub granules: Vec<WriteReport>,
    /// Resolved workflow references, for the caller's execution bookkeeping.
    pub context: ResolvedContext,
}

/// Workflow exception as a granule error document; `{}` when there is none.
fn parse_exception(exception: Option<&Value>) -> Value {
    match exception {
        None | Some(Value::Null) => json!({}),
        Some(Value::String(s)) if s.is_empty() || s == "None" => json!({}),
        Some(Value::String(s)) => json!({"Error": "Unknown Error", "Cause": s}),
        Some(other) => other.clone(),
    }
}

fn seconds(millis: u64) -> f64 {
    millis as f64 / 1000.0
}

/// Apply the message-path defaults to one granule.
fn message_payload(
    granule: MessageGranule,
    context: &WorkflowContext,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> GranulePayload {
    let MessageGranule {
        mut payload,
        sync_granule_duration,
        post_to_cmr_duration,
    } = granule;

    if let Some(status) = context.status {
        payload.status = Field::Value(status);
    }
    let status = payload.status.as_value().copied();

    // Error and publication state belong to this run, so a re-run never
    // inherits them from an earlier one.
    payload.error = Field::Value(if status == Some(GranuleStatus::Failed) {
        parse_exception(context.exception.as_ref())
    } else {
        json!({})
    });
    payload.published = payload.published.or_insert_with(|| false);
    // Files are only final once the workflow is.
    if !status.is_some_and(GranuleStatus::is_final) {
        payload.files = Field::Missing;
    }

    let elapsed = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
    payload.created_at = payload.created_at.or_insert_with(|| to_millis(started));
    payload.updated_at = Field::Value(to_millis(now));
    payload.timestamp = Field::Value(to_millis(now));
    payload.duration = payload.duration.or_insert_with(|| elapsed);
    payload.time_to_preprocess = Field::Value(seconds(sync_granule_duration.unwrap_or(0)));
    payload.time_to_archive = Field::Value(seconds(post_to_cmr_duration.unwrap_or(0)));
    payload
}

impl GranuleWriter {
    /// Resolve the references shared by a workflow event. Every lookup is
    /// optional; a miss leaves the reference out of the writes.
    pub async fn resolve_context(
        &self,
        context: &WorkflowContext,
    ) -> Result<ResolvedContext, WriteError> {
        let resolver = Resolver::new(self.primary.as_ref());
        let execution = context
            .execution
            .clone()
            .map(Reference::ExecutionUrl)
            .or_else(|| context.execution_arn.clone().map(Reference::ExecutionArn));

        Ok(ResolvedContext {
            execution_cumulus_id: resolver.optional(execution).await?,
            provider_cumulus_id: resolver
                .optional(context.provider.clone().map(Reference::Provider))
                .await?,
            pdr_cumulus_id: resolver
                .optional(context.pdr.clone().map(Reference::Pdr))
                .await?,
            parent_execution_cumulus_id: resolver
                .optional(context.parent_execution_arn.clone().map(Reference::ExecutionArn))
                .await?,
            async_operation_cumulus_id: resolver
                .optional(context.async_operation_id.clone().map(Reference::AsyncOperation))
                .await?,
        })
    }

    /// Write every granule of a workflow event.
    ///
    /// Granules are written independently and concurrently. If any of them
    /// fails the call returns [`WriteError::Batch`], even though the others
    /// are durably committed; re-delivery of the whole event is idempotent.
    #[instrument(skip(self, message), fields(granules = message.granules.len()))]
    pub async fn write_granules_from_message(
        &self,
        message: &WorkflowMessage,
    ) -> Result<BatchOutcome, WriteError> {
        if message.granules.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let started = message
            .context
            .workflow_start_time
            .ok_or_else(|| WriteError::InvalidMessage("workflowStartTime is required".to_string()))
            .and_then(|ms| {
                from_millis(ms).map_err(|e| WriteError::InvalidMessage(e.to_string()))
            })?;
        let resolved = self.resolve_context(&message.context).await?;
        let now = Utc::now();

        let shared = &message.context;
        let refs = &resolved;
        let results: Vec<(String, Result<WriteReport, WriteError>)> =
            stream::iter(message.granules.iter().cloned())
                .map(move |granule| async move {
                    let label = granule.payload.granule_id.as_value().cloned().unwrap_or_default();
                    let result = self
                        .write_message_granule(granule, shared, refs, started, now)
                        .await;
                    (label, result)
                })
                .buffer_unordered(self.config().max_concurrent_writes)
                .collect()
                .await;

        let total = results.len();
        let mut granules = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (granule_id, result) in results {
            match result {
                Ok(report) => granules.push(report),
                Err(e) => failures.push((granule_id, e)),
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), total, "granule batch partially failed");
            return Err(WriteError::Batch {
                failed: failures.len(),
                total,
                failures,
            });
        }

        info!(total, "granule batch written");
        Ok(BatchOutcome {
            granules,
            context: resolved,
        })
    }

    async fn write_message_granule(
        &self,
        granule: MessageGranule,
        context: &WorkflowContext,
        resolved: &ResolvedContext,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WriteReport, WriteError> {
        let payload = message_payload(granule, context, started, now);
        let key = validate(&payload)?;
        let is_final = payload.status.as_value().is_some_and(|s| s.is_final());

        let result = async {
            let collection_cumulus_id = Resolver::new(self.primary.as_ref())
                .collection(&key)
                .await?;
            self.write(WriteInput {
                payload,
                key: key.clone(),
                collection_cumulus_id,
                refs: resolved.refs(),
                event: None,
                defaults: Defaults {
                    created_at: started,
                    now,
                },
            })
            .await
        }
        .await;

        if let Err(cause) = &result {
            if is_final {
                self.mark_failed(&key.granule_id, &key.collection_id, cause)
                    .await;
            }
        }
        result
    }

    /// Best effort: record a failed final-state write on the stored granule.
    async fn mark_failed(&self, granule_id: &str, collection_id: &str, cause: &WriteError) {
        let marked = async {
            let existing = self.read_granule(granule_id, collection_id).await?;
            let error = append_error(
                &existing.error,
                ErrorEntry::new(cause.label(), cause.to_string()),
            );
            self.update_granule_status_to_failed(granule_id, collection_id, error)
                .await
        }
        .await;

        match marked {
            Ok(()) => info!(granule_id, "granule marked failed after write error"),
            Err(e) => warn!(granule_id, error = %e, "could not mark granule failed"),
        }
    }

    /// Write one granule from a direct API request.
    ///
    /// Explicit execution, provider and PDR references must resolve.
    #[instrument(skip(self, payload))]
    pub async fn write_granule_from_api(
        &self,
        payload: GranulePayload,
        event: EventType,
    ) -> Result<String, WriteError> {
        let key = validate(&payload)?;
        let resolver = Resolver::new(self.primary.as_ref());
        let collection_cumulus_id = resolver.collection(&key).await?;
        let refs = ResolvedRefs {
            execution: resolver
                .explicit(payload.execution.clone().map(Reference::ExecutionUrl))
                .await?,
            provider: resolver
                .explicit(payload.provider.clone().map(Reference::Provider))
                .await?,
            pdr: resolver
                .explicit(payload.pdr_name.clone().map(Reference::Pdr))
                .await?,
        };

        let granule_id = key.granule_id.clone();
        self.write(WriteInput {
            payload,
            key,
            collection_cumulus_id,
            refs,
            event: Some(event),
            defaults: Defaults::at(Utc::now()),
        })
        .await?;
        Ok(format!("Wrote Granule {granule_id}"))
    }

    /// Canonical view of a stored granule, straight from the primary store.
    pub async fn read_granule(
        &self,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<Granule, WriteError> {
        let collection_cumulus_id = Resolver::new(self.primary.as_ref())
            .collection_id(collection_id)
            .await?;
        let record = self
            .primary
            .get_granule(granule_id, collection_cumulus_id)
            .await?
            .ok_or_else(|| WriteError::missing("granules", granule_id))?;
        let cumulus_id = record
            .cumulus_id
            .ok_or_else(|| WriteError::missing("granules", granule_id))?;
        let files = self.primary.files_for_granule(cumulus_id).await?;
        Ok(to_canonical(self.primary.as_ref(), &record, &files).await?)
    }

    /// Patch an existing granule through the core writer as an `Update`.
    async fn patch_existing(
        &self,
        granule_id: &str,
        collection_id: &str,
        payload: GranulePayload,
        refs: ResolvedRefs,
    ) -> Result<WriteReport, WriteError> {
        let collection_cumulus_id = Resolver::new(self.primary.as_ref())
            .collection_id(collection_id)
            .await?;
        if self
            .primary
            .get_granule(granule_id, collection_cumulus_id)
            .await?
            .is_none()
        {
            return Err(WriteError::missing("granules", granule_id));
        }

        let key = validate(&payload)?;
        self.write(WriteInput {
            payload,
            key,
            collection_cumulus_id,
            refs,
            event: Some(EventType::Update),
            defaults: Defaults::at(Utc::now()),
        })
        .await
    }

    /// Re-queue a granule: status `queued`, execution pointer cleared.
    #[instrument(skip(self))]
    pub async fn update_granule_status_to_queued(
        &self,
        granule_id: &str,
        collection_id: &str,
    ) -> Result<(), WriteError> {
        let payload = GranulePayload::new(granule_id, collection_id).with_status(GranuleStatus::Queued);
        let refs = ResolvedRefs {
            execution: Field::Null,
            ..Default::default()
        };
        self.patch_existing(granule_id, collection_id, payload, refs)
            .await
            .map(|_| ())
    }

    /// Set a granule `failed` with `error` as its error payload.
    #[instrument(skip(self, error))]
    pub async fn update_granule_status_to_failed(
        &self,
        granule_id: &str,
        collection_id: &str,
        error: Value,
    ) -> Result<(), WriteError> {
        let mut payload =
            GranulePayload::new(granule_id, collection_id).with_status(GranuleStatus::Failed);
        payload.error = Field::Value(error);
        self.patch_existing(granule_id, collection_id, payload, ResolvedRefs::default())
            .await
            .map(|_| ())
    }

    /// Point a granule at an existing execution, looked up by ARN.
    #[instrument(skip(self))]
    pub async fn associate_execution(
        &self,
        granule_id: &str,
        collection_id: &str,
        execution_arn: &str,
    ) -> Result<(), WriteError> {
        let execution = Resolver::new(self.primary.as_ref())
            .required(&Reference::ExecutionArn(execution_arn.to_string()))
            .await?;
        let refs = ResolvedRefs {
            execution: Field::Value(execution),
            ..Default::default()
        };
        self.patch_existing(
            granule_id,
            collection_id,
            GranulePayload::new(granule_id, collection_id),
            refs,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(status: Option<GranuleStatus>) -> WorkflowContext {
        WorkflowContext {
            status,
            workflow_start_time: Some(1_000),
            exception: Some(json!({"Error": "TaskFailed", "Cause": "boom"})),
            ..Default::default()
        }
    }

    fn times() -> (DateTime<Utc>, DateTime<Utc>) {
        (from_millis(1_000).unwrap(), from_millis(4_500).unwrap())
    }

    #[test]
    fn test_message_deserializes_with_timings() {
        let message: WorkflowMessage = serde_json::from_value(json!({
            "granules": [{
                "granuleId": "g1",
                "collectionId": "MOD09GQ___006",
                "cmrLink": null,
                "syncGranuleDuration": 2500,
            }],
            "commonContext": {
                "executionArn": "arn:exec:1",
                "workflowStartTime": 1000,
                "status": "running",
            }
        }))
        .unwrap();

        let granule = &message.granules[0];
        assert_eq!(granule.payload.granule_id, Field::Value("g1".to_string()));
        assert!(granule.payload.cmr_link.is_null());
        assert!(granule.payload.published.is_missing());
        assert_eq!(granule.sync_granule_duration, Some(2500));
        assert_eq!(message.context.status, Some(GranuleStatus::Running));
        assert_eq!(message.context.execution_arn.as_deref(), Some("arn:exec:1"));
    }

    #[test]
    fn test_message_status_wins_and_running_drops_files() {
        let granule = MessageGranule::from(
            GranulePayload::new("g1", "c___1")
                .with_status(GranuleStatus::Completed)
                .with_files(vec![]),
        );
        let (started, now) = times();
        let payload = message_payload(granule, &context(Some(GranuleStatus::Running)), started, now);

        assert_eq!(payload.status, Field::Value(GranuleStatus::Running));
        assert!(payload.files.is_missing());
        assert_eq!(payload.error, Field::Value(json!({})));
        assert_eq!(payload.published, Field::Value(false));
    }

    #[test]
    fn test_failed_message_takes_exception() {
        let granule = MessageGranule::from(GranulePayload::new("g1", "c___1").with_files(vec![]));
        let (started, now) = times();
        let payload = message_payload(granule, &context(Some(GranuleStatus::Failed)), started, now);

        assert_eq!(
            payload.error,
            Field::Value(json!({"Error": "TaskFailed", "Cause": "boom"}))
        );
        assert_eq!(payload.files, Field::Value(vec![]));
    }

    #[test]
    fn test_message_timestamps_and_timings() {
        let mut granule = MessageGranule::from(
            GranulePayload::new("g1", "c___1").with_status(GranuleStatus::Completed),
        );
        granule.post_to_cmr_duration = Some(1_500);
        let (started, now) = times();
        let payload = message_payload(granule, &WorkflowContext::default(), started, now);

        assert_eq!(payload.created_at, Field::Value(1_000));
        assert_eq!(payload.updated_at, Field::Value(4_500));
        assert_eq!(payload.timestamp, Field::Value(4_500));
        assert_eq!(payload.duration, Field::Value(3.5));
        assert_eq!(payload.time_to_archive, Field::Value(1.5));
        assert_eq!(payload.time_to_preprocess, Field::Value(0.0));
    }

    #[test]
    fn test_explicit_created_at_is_honoured() {
        let mut payload = GranulePayload::new("g1", "c___1").with_status(GranuleStatus::Running);
        payload.created_at = Field::Value(42);
        let (started, now) = times();
        let out = message_payload(payload.clone().into(), &WorkflowContext::default(), started, now);
        assert_eq!(out.created_at, Field::Value(42));

        payload.created_at = Field::Null;
        let out = message_payload(payload.into(), &WorkflowContext::default(), started, now);
        assert_eq!(out.created_at, Field::Value(1_000));
    }

    #[test]
    fn test_parse_exception() {
        assert_eq!(parse_exception(None), json!({}));
        assert_eq!(parse_exception(Some(&Value::Null)), json!({}));
        assert_eq!(parse_exception(Some(&json!("None"))), json!({}));
        assert_eq!(parse_exception(Some(&json!({}))), json!({}));
        assert_eq!(
            parse_exception(Some(&json!("lambda timed out"))),
            json!({"Error": "Unknown Error", "Cause": "lambda timed out"})
        );
        assert_eq!(parse_exception(Some(&json!({"Error": "x"}))), json!({"Error": "x"}));
    }

    #[test]
    fn test_message_resets_stale_error_and_published() {
        let mut payload = GranulePayload::new("g1", "c___1").with_status(GranuleStatus::Completed);
        payload.error = Field::Value(json!({"Error": "old"}));
        let (started, now) = times();
        let out = message_payload(payload.clone().into(), &context(None), started, now);
        assert_eq!(out.error, Field::Value(json!({})));
        assert_eq!(out.published, Field::Value(false));

        payload.published = Field::Value(true);
        let out = message_payload(payload.into(), &context(None), started, now);
        assert_eq!(out.published, Field::Value(true));
    }
}
