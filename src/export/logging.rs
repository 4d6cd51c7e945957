//! Logging Exporter
//!
//! Writes each record as a JSON line through `tracing`.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ExportBatch, MetricExporter};
use crate::error::Result;

/// Logging-based exporter.
///
/// Useful for development and for deployments that ship logs rather than
/// scrape endpoints.
#[derive(Debug, Clone, Default)]
pub struct LoggingExporter {
    /// Whether to log records at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an exporter that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Create an exporter that logs at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl MetricExporter for LoggingExporter {
    fn name(&self) -> &str {
        "logging"
    }

    async fn export(&self, batch: &ExportBatch) -> Result<()> {
        for record in &batch.records {
            let json = serde_json::to_string(record)?;
            if self.info_level {
                info!(meter = %batch.meter, record = %json, "observation");
            } else {
                debug!(meter = %batch.meter, record = %json, "observation");
            }
        }

        for failure in &batch.failures {
            warn!(
                meter = %batch.meter,
                instrument = %failure.instrument,
                cycle_id = ?failure.cycle_id,
                partial_results = failure.partial_results,
                detail = %failure.detail,
                "collection failed"
            );
        }

        Ok(())
    }
}
