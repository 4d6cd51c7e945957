//! Result Sink
//!
//! Per-cycle accumulator handed to the callback.

use std::collections::HashMap;

use super::bound::{BoundId, BoundInstrument};

/// Accumulates `put` calls during one collection cycle.
///
/// The sink is lent to the callback as `&mut` and cannot outlive the call.
/// A second `put` for the same bound replaces the first value in place, so
/// drained captures keep the order in which each bound was first seen.
#[derive(Debug)]
pub struct ResultSink<T> {
    captures: Vec<(BoundInstrument, T)>,
    positions: HashMap<BoundId, usize>,
}

impl<T> ResultSink<T> {
    pub(crate) fn new() -> Self {
        Self {
            captures: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Record `value` for `bound`, replacing any earlier value this cycle
    pub fn put(&mut self, bound: &BoundInstrument, value: T) {
        match self.positions.get(&bound.id()) {
            Some(&idx) => self.captures[idx].1 = value,
            None => {
                self.positions.insert(bound.id(), self.captures.len());
                self.captures.push((bound.clone(), value));
            }
        }
    }

    /// Number of distinct bounds captured so far
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    pub(crate) fn into_captures(self) -> Vec<(BoundInstrument, T)> {
        self.captures
    }
}
