//! Observer Metrics - Asynchronous Metric Instruments
//!
//! Observer instruments report values that are pulled once per collection
//! cycle through a registered callback, keyed by immutable label sets.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (tick) → Meter sweep → ObserverRegistry::collect → Exporters
//! ```
//!
//! # Modules
//!
//! - [`observer`] - Label sets, bound instruments, registry and collection cycle
//! - [`meter`] - Instrument builder, named observers and multi-observer sweeps
//! - [`export`] - Export port with in-memory, logging and Prometheus backends
//! - [`scheduler`] - Periodic collection loop with per-observer timeouts
//! - [`error`] - Error types

pub mod error;
pub mod export;
pub mod meter;
pub mod observer;
pub mod scheduler;

// Re-export commonly used types
pub use error::{Error, Result};
pub use export::{ExportBatch, ExportRecord, MetricExporter};
pub use meter::{Meter, Observer};
pub use observer::{BoundInstrument, CycleReport, LabelSet, ObserverRegistry, ResultSink};
pub use scheduler::{CollectionLoop, CollectorConfig};
