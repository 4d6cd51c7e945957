//! Collection Scheduler
//!
//! Drives periodic sweeps of a [`Meter`] and hands the batches to exporters.
//!
//! Each observer is collected on the blocking pool under its own timeout, so
//! a hanging callback only costs its own instrument a data point. A timed-out
//! callback is not cancelled; it finishes in the background and its report
//! is discarded. Until it returns, later sweeps skip that instrument instead
//! of occupying another blocking thread with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::future::join_all;
use serde::Serialize;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::export::{ExportBatch, InstrumentFailure, MetricExporter};
use crate::meter::{append_report, Collectable, Meter};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between sweeps
    pub interval: Duration,

    /// Budget for a single observer's collect()
    pub collect_timeout: Duration,

    /// Budget for a single exporter call
    pub export_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            collect_timeout: Duration::from_secs(5),
            export_timeout: Duration::from_secs(10),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be non-zero".to_string()));
        }
        if self.collect_timeout.is_zero() || self.export_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.collect_timeout > self.interval {
            return Err(Error::Config(format!(
                "collect timeout {:?} exceeds interval {:?}",
                self.collect_timeout, self.interval
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct LoopCounters {
    sweeps: AtomicU64,
    records: AtomicU64,
    instrument_failures: AtomicU64,
    overruns: AtomicU64,
    export_failures: AtomicU64,
}

/// Snapshot of collection loop activity
#[derive(Debug, Clone, Serialize)]
pub struct LoopStats {
    pub sweeps: u64,
    pub records: u64,
    pub instrument_failures: u64,
    /// Collections skipped because the previous one had not returned
    pub overruns: u64,
    pub export_failures: u64,
}

/// Marks an instrument as collecting until the blocking task ends
struct InFlight {
    active: Arc<DashSet<String>>,
    instrument: String,
}

impl InFlight {
    fn acquire(active: &Arc<DashSet<String>>, instrument: &str) -> Option<Self> {
        active.insert(instrument.to_string()).then(|| Self {
            active: Arc::clone(active),
            instrument: instrument.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.active.remove(&self.instrument);
    }
}

// =============================================================================
// Collection Loop
// =============================================================================

/// Periodic collector for one meter
pub struct CollectionLoop {
    meter: Arc<Meter>,
    exporters: Vec<Arc<dyn MetricExporter>>,
    config: CollectorConfig,
    shutdown: CancellationToken,
    in_flight: Arc<DashSet<String>>,
    counters: LoopCounters,
}

impl CollectionLoop {
    pub fn new(
        meter: Arc<Meter>,
        exporters: Vec<Arc<dyn MetricExporter>>,
        config: CollectorConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            meter,
            exporters,
            config,
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(DashSet::new()),
            counters: LoopCounters::default(),
        }))
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
            records: self.counters.records.load(Ordering::Relaxed),
            instrument_failures: self.counters.instrument_failures.load(Ordering::Relaxed),
            overruns: self.counters.overruns.load(Ordering::Relaxed),
            export_failures: self.counters.export_failures.load(Ordering::Relaxed),
        }
    }

    /// Run sweeps until shut down
    #[instrument(skip(self), fields(meter = %self.meter.name()))]
    pub async fn run(self: Arc<Self>) {
        info!("Starting collection loop with {:?}", self.config);

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Collection loop shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Collect every observer once and export the result
    pub async fn sweep_once(&self) -> ExportBatch {
        let batch = self.collect_isolated().await;

        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        self.counters
            .records
            .fetch_add(batch.records.len() as u64, Ordering::Relaxed);
        self.counters
            .instrument_failures
            .fetch_add(batch.failures.len() as u64, Ordering::Relaxed);

        self.export(&batch).await;
        batch
    }

    async fn collect_isolated(&self) -> ExportBatch {
        let budget = self.config.collect_timeout;

        let mut batch = ExportBatch::new(self.meter.name());
        let mut runnable: Vec<(Arc<dyn Collectable>, InFlight)> = Vec::new();

        for instrument in self.meter.instruments() {
            let name = instrument.descriptor().name.clone();
            match InFlight::acquire(&self.in_flight, &name) {
                Some(guard) => runnable.push((instrument, guard)),
                None => {
                    self.counters.overruns.fetch_add(1, Ordering::Relaxed);
                    let err = Error::CollectionInProgress(name.clone());
                    warn!(instrument = %name, "{}", err);
                    batch.failures.push(InstrumentFailure {
                        instrument: name,
                        cycle_id: None,
                        partial_results: 0,
                        detail: err.to_string(),
                    });
                }
            }
        }

        let tasks = runnable.into_iter().map(|(instrument, guard)| async move {
            let worker = Arc::clone(&instrument);
            let handle = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                worker.collect_erased()
            });
            (instrument, timeout(budget, handle).await)
        });

        for (instrument, outcome) in join_all(tasks).await {
            let descriptor = instrument.descriptor();
            match outcome {
                Ok(Ok(report)) => append_report(&mut batch, descriptor, report),
                Ok(Err(e)) => {
                    error!(instrument = %descriptor.name, error = %e, "collection task failed");
                    batch.failures.push(InstrumentFailure {
                        instrument: descriptor.name.clone(),
                        cycle_id: None,
                        partial_results: 0,
                        detail: format!("collection task failed: {}", e),
                    });
                }
                Err(_) => {
                    let err = Error::CollectionTimeout {
                        instrument: descriptor.name.clone(),
                        timeout: budget,
                    };
                    warn!(instrument = %descriptor.name, "{}", err);
                    batch.failures.push(InstrumentFailure {
                        instrument: descriptor.name.clone(),
                        cycle_id: None,
                        partial_results: 0,
                        detail: err.to_string(),
                    });
                }
            }
        }

        debug!(
            records = batch.records.len(),
            failures = batch.failures.len(),
            "sweep collected"
        );
        batch
    }

    async fn export(&self, batch: &ExportBatch) {
        for exporter in &self.exporters {
            match timeout(self.config.export_timeout, exporter.export(batch)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.counters.export_failures.fetch_add(1, Ordering::Relaxed);
                    error!(exporter = exporter.name(), error = %e, "export failed");
                }
                Err(_) => {
                    self.counters.export_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        exporter = exporter.name(),
                        timeout = ?self.config.export_timeout,
                        "export timed out"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
