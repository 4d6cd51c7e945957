//! Export Sinks
//!
//! Consumers of per-cycle observations. The core hands out
//! `(labels, value)` pairs; the sweep attaches instrument name and timestamp
//! and delivers them here as an [`ExportBatch`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────────────────────┐
//! │ Meter sweep  │────▶│ ExportBatch  │────▶│ MetricExporter (port)       │
//! │ (per cycle)  │     │ records +    │     │  InMemory │ Logging │ Prom  │
//! └──────────────┘     │ failures     │     └─────────────────────────────┘
//!                      └──────────────┘
//! ```

mod logging;
mod memory;
mod prometheus;

pub use self::logging::LoggingExporter;
pub use self::memory::InMemoryExporter;
pub use self::prometheus::PrometheusExporter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::observer::{LabelSet, Observation};

/// One exported observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub instrument: String,
    pub unit: String,
    pub labels: LabelSet,
    pub value: Observation,
    pub timestamp: DateTime<Utc>,
}

/// A callback failure or timeout for one instrument in a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentFailure {
    pub instrument: String,
    /// Absent when the cycle never reported back (timeout)
    pub cycle_id: Option<u64>,
    pub partial_results: usize,
    pub detail: String,
}

/// Everything one sweep of a meter produced
#[derive(Debug, Clone, Serialize)]
pub struct ExportBatch {
    pub meter: String,
    pub collected_at: DateTime<Utc>,
    pub records: Vec<ExportRecord>,
    pub failures: Vec<InstrumentFailure>,
}

impl ExportBatch {
    pub fn new(meter: impl Into<String>) -> Self {
        Self {
            meter: meter.into(),
            collected_at: Utc::now(),
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.failures.is_empty()
    }

    /// Records of a single instrument
    pub fn records_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a ExportRecord> {
        self.records.iter().filter(move |r| r.instrument == instrument)
    }
}

/// Port implemented by every export backend
#[async_trait]
pub trait MetricExporter: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Deliver one batch
    async fn export(&self, batch: &ExportBatch) -> Result<()>;
}
