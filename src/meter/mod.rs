//! Meter
//!
//! Builds observer instruments and sweeps them. Each instrument owns exactly
//! one [`ObserverRegistry`]; the meter only keeps an index of them for
//! collection.
//!
//! # Usage
//!
//! ```
//! use observer_metrics::meter::Meter;
//! use observer_metrics::observer::LabelSet;
//!
//! let meter = Meter::new("my_library");
//! let depth = meter
//!     .i64_observer("queue.depth")
//!     .with_description("Items waiting per queue")
//!     .with_unit("{item}")
//!     .build()
//!     .unwrap();
//!
//! let ingest = depth.bind(LabelSet::from([("queue", "ingest")]));
//! depth.set_callback(move |sink| {
//!     sink.put(&ingest, 42);
//!     Ok(())
//! });
//!
//! let batch = meter.collect_all();
//! assert_eq!(batch.records.len(), 1);
//! ```
//!
//! Callbacks should capture bound instruments, not the `Observer` itself. A
//! callback holding its own observer keeps the registry alive until the
//! callback is cleared; [`Meter::remove`] clears it. Hold a `Weak` when the
//! callback needs the observer or another owner of the meter.

mod descriptor;
mod sweep;

pub use descriptor::{InstrumentDescriptor, MAX_NAME_LENGTH};
pub use sweep::append_report;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::observer::{
    BoundInstrument, CycleReport, LabelSet, Observation, ObservationValue, ObserverCallback,
    ObserverRegistry, ResultSink,
};

// =============================================================================
// Observer Handle
// =============================================================================

/// A named observer instrument
pub struct Observer<T> {
    descriptor: Arc<InstrumentDescriptor>,
    registry: Arc<ObserverRegistry<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: ObservationValue> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("name", &self.descriptor.name)
            .field("kind", &self.descriptor.kind)
            .field("registry", &self.registry.id())
            .finish()
    }
}

impl<T: ObservationValue> Observer<T> {
    fn new(descriptor: InstrumentDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            registry: Arc::new(ObserverRegistry::new()),
        }
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn registry(&self) -> &ObserverRegistry<T> {
        &self.registry
    }

    pub fn bind(&self, labels: LabelSet) -> BoundInstrument {
        self.registry.bind(labels)
    }

    /// Bind after checking `labels` against the declared label keys
    pub fn bind_checked(&self, labels: LabelSet) -> Result<BoundInstrument> {
        self.descriptor.check_labels(&labels)?;
        Ok(self.registry.bind(labels))
    }

    pub fn get_default_bound(&self) -> BoundInstrument {
        self.registry.get_default_bound()
    }

    pub fn unbind(&self, bound: &BoundInstrument) -> bool {
        self.registry.unbind(bound)
    }

    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&mut ResultSink<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.set_callback(callback);
    }

    pub fn set_callback_handler(&self, handler: Arc<dyn ObserverCallback<T>>) {
        self.registry.set_callback_handler(handler);
    }

    pub fn clear_callback(&self) {
        self.registry.clear_callback();
    }

    pub fn collect(&self) -> CycleReport<T> {
        self.registry.collect()
    }
}

/// Type-erased view of an instrument used by sweeps
pub trait Collectable: Send + Sync {
    fn descriptor(&self) -> &InstrumentDescriptor;

    /// Run one cycle; never panics
    fn collect_erased(&self) -> CycleReport<Observation>;

    /// Drop the callback so it releases whatever it captured
    fn detach(&self);
}

impl<T: ObservationValue> Collectable for Observer<T> {
    fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    fn collect_erased(&self) -> CycleReport<Observation> {
        self.registry.collect().erase()
    }

    fn detach(&self) {
        self.registry.clear_callback();
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder returned by [`Meter::i64_observer`] and [`Meter::f64_observer`]
pub struct ObserverBuilder<'m, T> {
    meter: &'m Meter,
    descriptor: InstrumentDescriptor,
    _marker: PhantomData<T>,
}

impl<T: ObservationValue> ObserverBuilder<'_, T> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor.unit = unit.into();
        self
    }

    /// Restrict the label keys accepted by `bind_checked`
    pub fn with_label_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.label_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Validate, create and register the observer
    pub fn build(self) -> Result<Observer<T>> {
        self.meter.register(self.descriptor)
    }
}

// =============================================================================
// Meter
// =============================================================================

/// Named group of observer instruments collected together
pub struct Meter {
    name: String,
    instruments: DashMap<String, Arc<dyn Collectable>>,
}

impl Meter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruments: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn i64_observer(&self, name: impl Into<String>) -> ObserverBuilder<'_, i64> {
        self.observer(name)
    }

    pub fn f64_observer(&self, name: impl Into<String>) -> ObserverBuilder<'_, f64> {
        self.observer(name)
    }

    pub fn observer<T: ObservationValue>(&self, name: impl Into<String>) -> ObserverBuilder<'_, T> {
        ObserverBuilder {
            meter: self,
            descriptor: InstrumentDescriptor::new(name, T::KIND),
            _marker: PhantomData,
        }
    }

    fn register<T: ObservationValue>(&self, descriptor: InstrumentDescriptor) -> Result<Observer<T>> {
        descriptor.validate()?;

        match self.instruments.entry(descriptor.name.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateInstrument(descriptor.name)),
            Entry::Vacant(slot) => {
                let observer = Observer::new(descriptor);
                slot.insert(Arc::new(observer.clone()));
                info!(
                    meter = %self.name,
                    instrument = %observer.name(),
                    kind = %T::KIND,
                    "registered observer"
                );
                Ok(observer)
            }
        }
    }

    /// Drop an instrument from future sweeps and clear its callback
    pub fn remove(&self, name: &str) -> bool {
        match self.instruments.remove(name) {
            Some((_, instrument)) => {
                instrument.detach();
                debug!(meter = %self.name, instrument = name, "removed observer");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Registered instruments in name order
    pub fn instruments(&self) -> Vec<Arc<dyn Collectable>> {
        let mut instruments: Vec<Arc<dyn Collectable>> = self
            .instruments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        instruments.sort_by(|a, b| a.descriptor().name.cmp(&b.descriptor().name));
        instruments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ValueKind;
    use assert_matches::assert_matches;

    #[test]
    fn test_build_observer() {
        let meter = Meter::new("test");
        let observer = meter
            .f64_observer("cpu.temperature")
            .with_description("Die temperature")
            .with_unit("Cel")
            .build()
            .unwrap();

        assert_eq!(observer.name(), "cpu.temperature");
        assert_eq!(observer.descriptor().kind, ValueKind::Float);
        assert_eq!(observer.descriptor().unit, "Cel");
        assert_eq!(meter.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let meter = Meter::new("test");
        meter.i64_observer("depth").build().unwrap();

        assert_matches!(
            meter.i64_observer("depth").build(),
            Err(Error::DuplicateInstrument(name)) if name == "depth"
        );
        assert_matches!(
            meter.f64_observer("depth").build(),
            Err(Error::DuplicateInstrument(_))
        );
    }

    #[test]
    fn test_invalid_name_rejected() {
        let meter = Meter::new("test");
        assert_matches!(
            meter.i64_observer("bad name").build(),
            Err(Error::InvalidInstrumentName { .. })
        );
        assert!(meter.is_empty());
    }

    #[test]
    fn test_each_observer_owns_a_registry() {
        let meter = Meter::new("test");
        let a = meter.i64_observer("a").build().unwrap();
        let b = meter.i64_observer("b").build().unwrap();
        assert_ne!(a.registry().id(), b.registry().id());

        let clone = a.clone();
        assert_eq!(clone.registry().id(), a.registry().id());
    }

    #[test]
    fn test_bind_checked() {
        let meter = Meter::new("test");
        let observer = meter
            .i64_observer("requests")
            .with_label_keys(["method"])
            .build()
            .unwrap();

        assert!(observer
            .bind_checked(LabelSet::from([("method", "GET")]))
            .is_ok());
        assert_matches!(
            observer.bind_checked(LabelSet::from([("path", "/")])),
            Err(Error::UnexpectedLabelKey { .. })
        );
    }

    #[test]
    fn test_remove_and_instrument_order() {
        let meter = Meter::new("test");
        meter.i64_observer("zeta").build().unwrap();
        meter.i64_observer("alpha").build().unwrap();

        let names: Vec<String> = meter
            .instruments()
            .iter()
            .map(|i| i.descriptor().name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(meter.remove("zeta"));
        assert!(!meter.remove("zeta"));
        assert_eq!(meter.len(), 1);
    }

    #[test]
    fn test_remove_releases_self_referencing_callback() {
        let meter = Meter::new("test");
        let observer = meter.i64_observer("self_ref").build().unwrap();
        let registry = Arc::downgrade(&observer.registry);

        let captured = observer.clone();
        observer.set_callback(move |sink| {
            sink.put(&captured.get_default_bound(), 1);
            Ok(())
        });

        assert!(meter.remove("self_ref"));
        assert!(!observer.registry().has_callback());

        drop(observer);
        assert!(registry.upgrade().is_none());
    }

    #[test]
    fn test_observer_debug_names_instrument() {
        let meter = Meter::new("test");
        let observer = meter.f64_observer("fan.speed").build().unwrap();
        let rendered = format!("{:?}", observer);
        assert!(rendered.contains("fan.speed"));
        assert!(rendered.contains(&observer.registry().id().to_string()));
    }
}
