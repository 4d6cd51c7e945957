//! In-memory exporter

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ExportBatch, ExportRecord, MetricExporter};
use crate::error::Result;

/// Keeps every exported batch in memory.
///
/// Used by tests and by embedders that read observations back directly.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    batches: RwLock<Vec<ExportBatch>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches received
    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }

    pub fn batches(&self) -> Vec<ExportBatch> {
        self.batches.read().clone()
    }

    /// Records of the most recent batch
    pub fn latest_records(&self) -> Vec<ExportRecord> {
        self.batches
            .read()
            .last()
            .map(|b| b.records.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.batches.write().clear();
    }
}

#[async_trait]
impl MetricExporter for InMemoryExporter {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn export(&self, batch: &ExportBatch) -> Result<()> {
        self.batches.write().push(batch.clone());
        Ok(())
    }
}
