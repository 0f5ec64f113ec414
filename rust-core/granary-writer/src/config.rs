// SPDX-License-Identifier: PMPL-1.0-or-later
//! Writer configuration.
//!
//! Passed explicitly to [`GranuleWriter::new`](crate::GranuleWriter::new);
//! nothing is read from the environment at call time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Startup-time configuration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Telemetry(String),

    #[error("Failed to register metrics: {0}")]
    Metrics(String),
}

/// Logging settings for [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Granule writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Topic every committed write is published to
    pub notification_topic: String,
    /// Search index name passed to every index call
    pub search_index: String,
    /// Store name in the file-failure label `Failed writing files to <label>.`
    pub file_store_label: String,
    /// Granule writes in flight per batch
    pub max_concurrent_writes: usize,
    pub logging: LoggingConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            notification_topic: String::new(),
            search_index: String::new(),
            file_store_label: "PostgreSQL".to_string(),
            max_concurrent_writes: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl WriterConfig {
    pub fn new(notification_topic: impl Into<String>, search_index: impl Into<String>) -> Self {
        Self {
            notification_topic: notification_topic.into(),
            search_index: search_index.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_writes(mut self, max: usize) -> Self {
        self.max_concurrent_writes = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_topic.trim().is_empty() {
            return Err(ConfigError::Missing("notification_topic"));
        }
        if self.search_index.trim().is_empty() {
            return Err(ConfigError::Missing("search_index"));
        }
        if self.file_store_label.trim().is_empty() {
            return Err(ConfigError::Missing("file_store_label"));
        }
        if self.max_concurrent_writes == 0 {
            return Err(ConfigError::Invalid {
                name: "max_concurrent_writes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
