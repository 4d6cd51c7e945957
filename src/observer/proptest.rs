//! Property-Based Tests for the Observer Core
//!
//! # Test Properties
//!
//! 1. **Order Independence**: label sets built from permuted pairs are equal
//! 2. **Interning**: every live label set maps to exactly one identity
//! 3. **No Reuse**: a retired identity is never handed out again
//! 4. **Last Write Wins**: a cycle reports the final put per bound

#![cfg(test)]

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use super::{BoundId, LabelSet, ObserverRegistry};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for label pairs with distinct keys.
fn pairs_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::hash_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..6)
        .prop_map(|m| m.into_iter().collect())
}

#[derive(Debug, Clone)]
enum Op {
    Bind(usize),
    Unbind(usize),
}

/// Strategy for bind/unbind sequences over a small label pool.
fn ops_strategy(pool: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            (0..pool).prop_map(Op::Bind),
            (0..pool).prop_map(Op::Unbind),
        ],
        1..200,
    )
}

fn pool_label(i: usize) -> LabelSet {
    LabelSet::from([("slot", i.to_string())])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: pair order never affects equality.
    #[test]
    fn prop_label_set_order_independent(pairs in pairs_strategy()) {
        let forward = LabelSet::from_pairs(pairs.clone());
        let reversed = LabelSet::from_pairs(pairs.into_iter().rev());
        prop_assert_eq!(forward, reversed);
    }

    /// Property: the registry agrees with a sequential model and never
    /// re-issues a retired identity.
    #[test]
    fn prop_bind_unbind_matches_model(ops in ops_strategy(8)) {
        let registry: ObserverRegistry<i64> = ObserverRegistry::new();
        let mut model = HashMap::new();
        let mut retired: HashSet<BoundId> = HashSet::new();

        for op in ops {
            match op {
                Op::Bind(i) => {
                    let bound = registry.bind(pool_label(i));
                    prop_assert!(!retired.contains(&bound.id()));
                    if let Some(existing) = model.get(&i) {
                        prop_assert_eq!(existing, &bound);
                    }
                    model.insert(i, bound);
                }
                Op::Unbind(i) => {
                    if let Some(bound) = model.remove(&i) {
                        prop_assert!(registry.unbind(&bound));
                        retired.insert(bound.id());
                    }
                }
            }
            prop_assert_eq!(registry.len(), model.len() + 1);
        }
    }

    /// Property: the last value put for each bound is the one reported.
    #[test]
    fn prop_last_write_wins(puts in prop::collection::vec((0usize..4, any::<i64>()), 0..50)) {
        let registry: ObserverRegistry<i64> = ObserverRegistry::new();
        let bounds: Vec<_> = (0..4).map(|i| registry.bind(pool_label(i))).collect();

        let mut expected = HashMap::new();
        for (i, v) in &puts {
            expected.insert(pool_label(*i), *v);
        }

        let captured = bounds.clone();
        registry.set_callback(move |sink| {
            for (i, v) in &puts {
                sink.put(&captured[*i], *v);
            }
            Ok(())
        });

        let report = registry.collect();
        prop_assert_eq!(report.points.len(), expected.len());
        for point in &report.points {
            prop_assert_eq!(Some(&point.value), expected.get(&point.labels));
        }
    }
}
