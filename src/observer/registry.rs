//! Observer Registry
//!
//! Interning table from label sets to bound instruments plus the single
//! callback slot of one observer instrument.
//!
//! # Concurrency contract
//!
//! - `bind`, `unbind`, `set_callback` and `collect` may run concurrently from
//!   any number of threads.
//! - Equal label sets bound concurrently always yield one identity.
//! - A `bind` that returns before `collect` starts is visible to that cycle.
//!   Binds and unbinds racing with a cycle are visible to the next one.
//! - The callback runs with no registry lock held, so it may call back into
//!   the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, instrument, trace};

use super::bound::{BoundInstrument, RegistryId};
use super::callback::ObserverCallback;
use super::cycle::{CollectionCycle, CycleReport};
use super::labels::LabelSet;
use super::shard::ShardedMap;
use super::sink::ResultSink;
use super::value::ObservationValue;
use super::SHARD_COUNT;

/// Sequence reserved for the default bound
const DEFAULT_SEQUENCE: u64 = 0;

type SharedCallback<T> = Arc<dyn ObserverCallback<T>>;

#[derive(Debug, Default)]
struct RegistryCounters {
    minted: AtomicU64,
    retired: AtomicU64,
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

/// Point-in-time statistics of a registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub registry: RegistryId,
    /// Live associations, including the default bound
    pub live_bindings: usize,
    /// Bound instruments ever created, including the default bound
    pub minted: u64,
    pub retired: u64,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub lookups: u64,
    pub mutations: u64,
    /// Live associations per lock stripe
    pub shard_entries: Vec<usize>,
}

/// Bind/unbind/callback state of one observer instrument
pub struct ObserverRegistry<T> {
    id: RegistryId,
    bindings: ShardedMap<LabelSet, BoundInstrument, SHARD_COUNT>,
    default_bound: BoundInstrument,
    callback: RwLock<Option<SharedCallback<T>>>,
    next_sequence: AtomicU64,
    next_cycle: AtomicU64,
    counters: RegistryCounters,
}

impl<T: ObservationValue> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ObservationValue> ObserverRegistry<T> {
    /// Create a registry with its default bound already interned
    pub fn new() -> Self {
        let id = RegistryId::new();
        let default_bound = BoundInstrument::new(id, DEFAULT_SEQUENCE, LabelSet::empty());
        let bindings = ShardedMap::new();
        bindings.get_or_insert_with(LabelSet::empty(), || default_bound.clone());

        let counters = RegistryCounters::default();
        counters.minted.store(1, Ordering::Relaxed);

        Self {
            id,
            bindings,
            default_bound,
            callback: RwLock::new(None),
            next_sequence: AtomicU64::new(DEFAULT_SEQUENCE + 1),
            next_cycle: AtomicU64::new(1),
            counters,
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Return the bound instrument for `labels`, creating it if needed
    pub fn bind(&self, labels: LabelSet) -> BoundInstrument {
        let key = labels.clone();
        let (bound, minted) = self.bindings.get_or_insert_with(key, || {
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            BoundInstrument::new(self.id, sequence, labels)
        });

        if minted {
            self.counters.minted.fetch_add(1, Ordering::Relaxed);
            debug!(
                registry = %self.id,
                bound = %bound.id(),
                labels = %bound.labels(),
                "bound new instrument"
            );
        } else {
            trace!(registry = %self.id, bound = %bound.id(), "reusing bound instrument");
        }

        bound
    }

    /// The instrument for the empty label set
    pub fn get_default_bound(&self) -> BoundInstrument {
        self.default_bound.clone()
    }

    /// Retire `bound` if it is still the live association for its labels.
    ///
    /// Unknown, already retired, foreign and default bounds are ignored.
    /// Returns whether an association was removed.
    pub fn unbind(&self, bound: &BoundInstrument) -> bool {
        if bound.registry() != self.id {
            debug!(registry = %self.id, bound = %bound.id(), "ignoring unbind of foreign instrument");
            return false;
        }
        if *bound == self.default_bound {
            return false;
        }

        let retired = self
            .bindings
            .remove_if(bound.labels(), |current| current == bound)
            .is_some();

        if retired {
            self.counters.retired.fetch_add(1, Ordering::Relaxed);
            debug!(
                registry = %self.id,
                bound = %bound.id(),
                labels = %bound.labels(),
                "retired instrument"
            );
        }
        retired
    }

    /// Whether `bound` is the live association for its label set
    pub fn is_bound(&self, bound: &BoundInstrument) -> bool {
        bound.registry() == self.id
            && self
                .bindings
                .get(bound.labels())
                .is_some_and(|current| &current == bound)
    }

    /// Number of live associations, including the default bound
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Always false: the default bound is never retired
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Snapshot of live associations
    pub fn bindings(&self) -> Vec<(LabelSet, BoundInstrument)> {
        self.bindings.entries()
    }

    // =========================================================================
    // Callback
    // =========================================================================

    /// Install `callback`, replacing any previous one
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&mut ResultSink<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: SharedCallback<T> = Arc::new(callback);
        self.replace_callback(Some(handler));
    }

    /// Install a shared handler, returning the one it replaced
    pub fn set_callback_handler(&self, handler: SharedCallback<T>) -> Option<SharedCallback<T>> {
        self.replace_callback(Some(handler))
    }

    /// Remove the callback; later cycles produce no output
    pub fn clear_callback(&self) -> Option<SharedCallback<T>> {
        self.replace_callback(None)
    }

    pub fn has_callback(&self) -> bool {
        self.callback.read().is_some()
    }

    fn replace_callback(&self, next: Option<SharedCallback<T>>) -> Option<SharedCallback<T>> {
        let installed = next.is_some();
        let previous = std::mem::replace(&mut *self.callback.write(), next);
        debug!(registry = %self.id, installed, "callback replaced");
        previous
    }

    pub(crate) fn callback_snapshot(&self) -> Option<SharedCallback<T>> {
        self.callback.read().clone()
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run one collection cycle on the calling thread
    #[instrument(level = "debug", skip(self), fields(registry = %self.id))]
    pub fn collect(&self) -> CycleReport<T> {
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        CollectionCycle::new(self, cycle_id).run()
    }

    pub(crate) fn record_cycle(&self, failed: bool) {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.counters.failed_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let table = self.bindings.stats();
        RegistryStats {
            registry: self.id,
            live_bindings: table.total_entries,
            minted: self.counters.minted.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            failed_cycles: self.counters.failed_cycles.load(Ordering::Relaxed),
            lookups: table.total_reads,
            mutations: table.total_writes,
            shard_entries: table.shard_entry_counts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
