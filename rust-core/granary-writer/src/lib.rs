// SPDX-License-Identifier: PMPL-1.0-or-later
//! Granary Writer
//!
//! The granule write-consistency engine. A write is committed to the
//! relational primary inside one transaction; the document mirror and the
//! search index are written while that transaction is still open and undone
//! by compensation if anything later fails. Subscribers are notified only
//! after the commit.
//!
//! Entry points live on [`GranuleWriter`]:
//!
//! - [`write_granules_from_message`](GranuleWriter::write_granules_from_message)
//! - [`write_granule_from_api`](GranuleWriter::write_granule_from_api)
//! - [`update_granule_status_to_queued`](GranuleWriter::update_granule_status_to_queued),
//!   [`update_granule_status_to_failed`](GranuleWriter::update_granule_status_to_failed),
//!   [`associate_execution`](GranuleWriter::associate_execution)
//! - [`read_granule`](GranuleWriter::read_granule)

pub mod config;
pub mod error;
mod files;
pub mod metrics;
mod normalizer;
mod orchestrator;
mod resolver;
pub mod saga;
pub mod telemetry;
mod translate;
mod writer;

pub use config::{ConfigError, LoggingConfig, WriterConfig};
pub use error::WriteError;
pub use metrics::WriterMetrics;
pub use orchestrator::{BatchOutcome, MessageGranule, WorkflowContext, WorkflowMessage};
pub use resolver::ResolvedContext;
pub use saga::{CompensationLog, UnwindReport};
pub use telemetry::init_tracing;
pub use writer::{GranuleWriter, WriteReport};
