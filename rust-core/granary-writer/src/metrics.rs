// SPDX-License-Identifier: PMPL-1.0-or-later
//! Prometheus counters for granule writes.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use granary_model::EventType;

use crate::config::ConfigError;

/// Write counters, registered on a caller-supplied [`Registry`].
#[derive(Clone)]
pub struct WriterMetrics {
    granules_written: IntCounterVec,
    write_failures: IntCounter,
    compensations: IntCounter,
    compensation_failures: IntCounter,
    degraded_file_writes: IntCounter,
    notification_failures: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, ConfigError> {
    let counter = IntCounter::new(name, help).map_err(|e| ConfigError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| ConfigError::Metrics(e.to_string()))?;
    Ok(counter)
}

impl WriterMetrics {
    pub fn register(registry: &Registry) -> Result<Self, ConfigError> {
        let granules_written = IntCounterVec::new(
            Opts::new("granary_granules_written_total", "Granule writes committed"),
            &["event"],
        )
        .map_err(|e| ConfigError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(granules_written.clone()))
            .map_err(|e| ConfigError::Metrics(e.to_string()))?;

        Ok(Self {
            granules_written,
            write_failures: counter(
                registry,
                "granary_granule_write_failures_total",
                "Granule writes rolled back",
            )?,
            compensations: counter(
                registry,
                "granary_compensations_total",
                "Mirror compensations executed",
            )?,
            compensation_failures: counter(
                registry,
                "granary_compensation_failures_total",
                "Mirror compensations that failed and need external reconciliation",
            )?,
            degraded_file_writes: counter(
                registry,
                "granary_degraded_file_writes_total",
                "Granule writes committed with failed files",
            )?,
            notification_failures: counter(
                registry,
                "granary_notification_failures_total",
                "Notifications that failed after commit",
            )?,
        })
    }

    pub fn record_written(&self, event: EventType) {
        let label = event.to_string();
        self.granules_written
            .with_label_values(&[label.as_str()])
            .inc();
    }

    pub fn record_failure(&self) {
        self.write_failures.inc();
    }

    pub fn record_compensations(&self, executed: usize, failed: usize) {
        self.compensations.inc_by(executed as u64);
        self.compensation_failures.inc_by(failed as u64);
    }

    pub fn record_degraded_files(&self) {
        self.degraded_file_writes.inc();
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.inc();
    }

    pub fn written(&self, event: EventType) -> u64 {
        let label = event.to_string();
        self.granules_written
            .with_label_values(&[label.as_str()])
            .get()
    }

    pub fn failures(&self) -> u64 {
        self.write_failures.get()
    }

    pub fn compensation_count(&self) -> u64 {
        self.compensations.get()
    }

    pub fn compensation_failure_count(&self) -> u64 {
        self.compensation_failures.get()
    }

    pub fn degraded_file_count(&self) -> u64 {
        self.degraded_file_writes.get()
    }

    pub fn notification_failure_count(&self) -> u64 {
        self.notification_failures.get()
    }
}
