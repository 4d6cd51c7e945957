//! Concurrency Tests
//!
//! Races between bind, unbind, callback replacement and collection on a
//! single observer registry.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use observer_metrics::observer::{BoundInstrument, IntegerObserverRegistry, LabelSet};

#[test]
fn test_concurrent_bind_same_labels_yields_one_identity() {
    let registry = Arc::new(IntegerObserverRegistry::new());
    let barrier = Arc::new(Barrier::new(50));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.bind(LabelSet::from([("method", "GET")]))
            })
        })
        .collect();

    let bounds: Vec<BoundInstrument> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: HashSet<_> = bounds.iter().map(|b| b.id()).collect();

    assert_eq!(ids.len(), 1);
    // The GET binding plus the default bound
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.stats().minted, 2);
}

#[test]
fn test_bind_unbind_churn_during_collection() {
    const LABEL_SETS: usize = 10;
    const OPERATIONS: usize = 1000;
    const COLLECTIONS: usize = 100;

    let registry = Arc::new(IntegerObserverRegistry::new());
    let held: Arc<Mutex<Vec<BoundInstrument>>> = Arc::new(Mutex::new(Vec::new()));
    let minted: Arc<Mutex<Vec<BoundInstrument>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let held = Arc::clone(&held);
        registry.set_callback(move |sink| {
            for (i, bound) in held.lock().iter().enumerate() {
                sink.put(bound, i as i64);
            }
            Ok(())
        });
    }

    let label_set = |i: usize| LabelSet::from([("shard", i.to_string())]);

    let churn: Vec<_> = (0..4)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let held = Arc::clone(&held);
            let minted = Arc::clone(&minted);
            thread::spawn(move || {
                for op in 0..OPERATIONS / 4 {
                    let labels = label_set((worker + op) % LABEL_SETS);
                    if op % 3 == 2 {
                        let victim = held.lock().pop();
                        if let Some(bound) = victim {
                            registry.unbind(&bound);
                        }
                    } else {
                        let bound = registry.bind(labels);
                        minted.lock().push(bound.clone());
                        held.lock().push(bound);
                    }
                }
            })
        })
        .collect();

    let collectors: Vec<_> = (0..2)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut failures = 0;
                for _ in 0..COLLECTIONS / 2 {
                    let report = registry.collect();
                    if !report.is_success() {
                        failures += 1;
                    }
                    assert_eq!(report.foreign, 0);
                }
                failures
            })
        })
        .collect();

    for handle in churn {
        handle.join().unwrap();
    }
    let failures: usize = collectors.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(failures, 0);

    // At rest at most one binding per label set plus the default bound
    assert!(registry.len() <= LABEL_SETS + 1);

    // Live bindings never share an identity
    let live = registry.bindings();
    let ids: HashSet<_> = live.iter().map(|(_, b)| b.id()).collect();
    assert_eq!(ids.len(), live.len());

    // Each live binding is keyed by the labels it was minted with
    for (labels, bound) in &live {
        assert!(registry.is_bound(bound));
        let reported = registry.bind(labels.clone());
        assert_eq!(&reported, bound);
    }

    // Identities are never reused after retirement
    let minted = minted.lock();
    let distinct: HashSet<_> = minted.iter().map(|b| b.id()).collect();
    assert_eq!(distinct.len() as u64, registry.stats().minted - 1);
    assert!(distinct.iter().all(|id| id.sequence > 0));
}

#[test]
fn test_set_callback_races_with_collect() {
    let registry = Arc::new(IntegerObserverRegistry::new());
    let default = registry.get_default_bound();
    let barrier = Arc::new(Barrier::new(2));

    let setter = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for generation in 0..200i64 {
                let bound = default.clone();
                registry.set_callback(move |sink| {
                    sink.put(&bound, generation);
                    Ok(())
                });
            }
        })
    };

    let collector = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut last_seen = None;
            for _ in 0..200 {
                let report = registry.collect();
                assert!(report.is_success());
                // Either no callback yet, or exactly one complete callback ran
                assert!(report.points.len() <= 1);
                if let Some(point) = report.points.first() {
                    last_seen = Some(point.value);
                }
            }
            last_seen
        })
    };

    setter.join().unwrap();
    collector.join().unwrap();

    // Once the setter is done, the final callback is the one observed
    let report = registry.collect();
    assert_eq!(report.points.len(), 1);
    assert_eq!(report.points[0].value, 199);
}

#[test]
fn test_callback_may_reenter_registry() {
    let registry = Arc::new(IntegerObserverRegistry::new());
    let inner = Arc::downgrade(&registry);

    registry.set_callback(move |sink| {
        let Some(registry) = inner.upgrade() else {
            return Ok(());
        };
        let bound = registry.bind(LabelSet::from([("phase", "callback")]));
        sink.put(&bound, registry.len() as i64);
        Ok(())
    });

    let report = registry.collect();
    assert!(report.is_success());
    assert_eq!(
        report.value_for(&LabelSet::from([("phase", "callback")])),
        Some(&2)
    );
}

#[test]
fn test_collect_without_callback_is_empty() {
    let registry = IntegerObserverRegistry::new();
    registry.bind(LabelSet::from([("k", "v")]));

    let report = registry.collect();
    assert!(report.is_success());
    assert!(report.points.is_empty());
    assert_eq!(report.stale, 0);
}

#[test]
fn test_unbind_during_cycle_still_reports_value() {
    let registry = Arc::new(IntegerObserverRegistry::new());
    let bound = registry.bind(LabelSet::from([("conn", "42")]));

    {
        let registry_weak = Arc::downgrade(&registry);
        let bound = bound.clone();
        registry.set_callback(move |sink| {
            sink.put(&bound, 9);
            if let Some(registry) = registry_weak.upgrade() {
                registry.unbind(&bound);
            }
            Ok(())
        });
    }

    let report = registry.collect();
    assert_eq!(report.points.len(), 1);
    assert_eq!(report.stale, 1);
    assert_eq!(report.points[0].labels, LabelSet::from([("conn", "42")]));
    assert!(!registry.is_bound(&bound));
}

#[test]
fn test_bind_on_one_thread_is_visible_to_collect_on_another() {
    let registry = Arc::new(IntegerObserverRegistry::new());
    let published: Arc<Mutex<Vec<BoundInstrument>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let published = Arc::clone(&published);
        registry.set_callback(move |sink| {
            for bound in published.lock().iter() {
                sink.put(bound, 5);
            }
            Ok(())
        });
    }

    let binder = {
        let registry = Arc::clone(&registry);
        let published = Arc::clone(&published);
        thread::spawn(move || {
            let bound = registry.bind(LabelSet::from([("worker", "binder")]));
            published.lock().push(bound.clone());
            bound
        })
    };
    let bound = binder.join().unwrap();

    let collector = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.collect())
    };
    let report = collector.join().unwrap();

    assert!(report.is_success());
    assert_eq!(report.stale, 0);
    assert_eq!(
        report.value_for(&LabelSet::from([("worker", "binder")])),
        Some(&5)
    );
    assert!(registry.is_bound(&bound));
}
