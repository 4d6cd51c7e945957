//! Observer Instrument Core
//!
//! Asynchronous instruments whose values are pulled once per collection
//! cycle through a user callback instead of being pushed on every event.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          ObserverRegistry                                 │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────┐    ┌────────────────────────────────┐  │
//! │  │ Interning table              │    │ Callback slot                  │  │
//! │  │ ShardedMap<LabelSet, Bound>  │    │ RwLock<Option<Arc<dyn ..>>>    │  │
//! │  │ (16-way, default pre-bound)  │    │ (last writer wins)             │  │
//! │  └──────────────────────────────┘    └────────────────────────────────┘  │
//! │                 │                                  │                     │
//! │                 └────────────────┬─────────────────┘                     │
//! │                                  ▼                                       │
//! │             CollectionCycle ──▶ ResultSink ──▶ CycleReport               │
//! │             (one per collect)  (lent to callback)  (labels, value)*      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use observer_metrics::observer::{LabelSet, ObserverRegistry};
//!
//! let registry: ObserverRegistry<i64> = ObserverRegistry::new();
//! let get = registry.bind(LabelSet::from([("method", "GET")]));
//!
//! registry.set_callback(move |sink| {
//!     sink.put(&get, 12);
//!     Ok(())
//! });
//!
//! let report = registry.collect();
//! assert_eq!(report.points.len(), 1);
//! ```

mod bound;
mod callback;
mod cycle;
mod labels;
mod registry;
mod shard;
mod sink;
mod value;

#[cfg(test)]
mod proptest;

pub use bound::{BoundId, BoundInstrument, RegistryId};
pub use callback::ObserverCallback;
pub use cycle::{CollectionCycle, CycleFailure, CycleReport, DataPoint};
pub use labels::LabelSet;
pub use registry::{ObserverRegistry, RegistryStats};
pub use sink::ResultSink;
pub use value::{Observation, ObservationValue, ValueKind};

/// Number of lock stripes in a registry's interning table
pub const SHARD_COUNT: usize = 16;

/// Cache line size for alignment (x86-64)
pub const CACHE_LINE_SIZE: usize = 64;

/// Observer reporting integer values
pub type IntegerObserverRegistry = ObserverRegistry<i64>;

/// Observer reporting floating point values
pub type FloatObserverRegistry = ObserverRegistry<f64>;
