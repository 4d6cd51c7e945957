//! Collection Cycle
//!
//! One pull of an observer: run the callback, drain the sink, resolve
//! captured bounds into exportable data points.
//!
//! Retired bounds resolve through the label snapshot they carry, so an
//! `unbind` racing with an in-flight cycle never loses or corrupts a value.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::labels::LabelSet;
use super::registry::ObserverRegistry;
use super::sink::ResultSink;
use super::value::{Observation, ObservationValue};
use crate::error::Error;

/// One resolved (label set, value) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint<T> {
    pub labels: LabelSet,
    pub value: T,
}

/// Structured report of a callback that failed mid-cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleFailure {
    pub cycle_id: u64,
    /// Results captured before the failure (still exported)
    pub partial_results: usize,
    pub detail: String,
}

impl From<CycleFailure> for Error {
    fn from(failure: CycleFailure) -> Self {
        Error::CallbackFailure {
            cycle_id: failure.cycle_id,
            partial_results: failure.partial_results,
            detail: failure.detail,
        }
    }
}

/// Outcome of one `collect()` call
#[derive(Debug, Clone)]
pub struct CycleReport<T> {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Resolved points in order of first capture
    pub points: Vec<DataPoint<T>>,
    /// Points resolved for bounds that were retired when the cycle drained
    pub stale: usize,
    /// Puts with bounds minted by another registry (dropped)
    pub foreign: usize,
    pub failure: Option<CycleFailure>,
}

impl<T> CycleReport<T> {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The points, or the failure as an error (partial points are discarded)
    pub fn into_result(self) -> crate::Result<Vec<DataPoint<T>>> {
        match self.failure {
            Some(failure) => Err(failure.into()),
            None => Ok(self.points),
        }
    }

    /// Look up the value reported for a label set
    pub fn value_for(&self, labels: &LabelSet) -> Option<&T> {
        self.points
            .iter()
            .find(|p| &p.labels == labels)
            .map(|p| &p.value)
    }
}

impl<T: ObservationValue> CycleReport<T> {
    /// Erase the numeric type for multi-observer sweeps
    pub fn erase(self) -> CycleReport<Observation> {
        CycleReport {
            cycle_id: self.cycle_id,
            started_at: self.started_at,
            elapsed: self.elapsed,
            points: self
                .points
                .into_iter()
                .map(|p| DataPoint {
                    labels: p.labels,
                    value: p.value.into_observation(),
                })
                .collect(),
            stale: self.stale,
            foreign: self.foreign,
            failure: self.failure,
        }
    }
}

/// Short-lived state for a single collection
pub struct CollectionCycle<'r, T> {
    registry: &'r ObserverRegistry<T>,
    cycle_id: u64,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl<'r, T: ObservationValue> CollectionCycle<'r, T> {
    pub(crate) fn new(registry: &'r ObserverRegistry<T>, cycle_id: u64) -> Self {
        Self {
            registry,
            cycle_id,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    /// Run the callback and resolve its captures
    pub fn run(self) -> CycleReport<T> {
        let Some(callback) = self.registry.callback_snapshot() else {
            return self.finish(Vec::new(), 0, 0, None);
        };

        let mut sink = ResultSink::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.update(&mut sink)));
        let failure_detail = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(format!("callback panicked: {}", panic_message(&*payload))),
        };

        let registry_id = self.registry.id();
        let mut points = Vec::with_capacity(sink.len());
        let mut stale = 0;
        let mut foreign = 0;

        for (bound, value) in sink.into_captures() {
            if bound.registry() != registry_id {
                foreign += 1;
                warn!(
                    registry = %registry_id,
                    bound = %bound.id(),
                    "dropping value put with an instrument from another observer"
                );
                continue;
            }
            if !self.registry.is_bound(&bound) {
                stale += 1;
                debug!(bound = %bound.id(), labels = %bound.labels(), "resolving retired instrument");
            }
            points.push(DataPoint {
                labels: bound.labels().clone(),
                value,
            });
        }

        let failure = failure_detail.map(|detail| CycleFailure {
            cycle_id: self.cycle_id,
            partial_results: points.len(),
            detail,
        });

        if let Some(ref f) = failure {
            warn!(
                registry = %registry_id,
                cycle_id = f.cycle_id,
                partial_results = f.partial_results,
                error = %f.detail,
                "observer callback failed"
            );
        }

        self.finish(points, stale, foreign, failure)
    }

    fn finish(
        self,
        points: Vec<DataPoint<T>>,
        stale: usize,
        foreign: usize,
        failure: Option<CycleFailure>,
    ) -> CycleReport<T> {
        self.registry.record_cycle(failure.is_some());
        CycleReport {
            cycle_id: self.cycle_id,
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            points,
            stale,
            foreign,
            failure,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_no_callback_yields_empty_success() {
        let registry: ObserverRegistry<i64> = ObserverRegistry::new();
        let report = registry.collect();

        assert!(report.is_success());
        assert!(report.points.is_empty());
        assert_eq!(report.cycle_id, 1);
    }

    #[test]
    fn test_error_keeps_partial_results() {
        let registry: ObserverRegistry<i64> = ObserverRegistry::new();
        let b1 = registry.bind(LabelSet::from([("n", "1")]));
        let b2 = registry.bind(LabelSet::from([("n", "2")]));

        registry.set_callback(move |sink| {
            sink.put(&b1, 1);
            sink.put(&b2, 2);
            anyhow::bail!("backend unavailable")
        });

        let report = registry.collect();
        assert_eq!(report.points.len(), 2);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.partial_results, 2);
        assert!(failure.detail.contains("backend unavailable"));

        assert_matches!(
            report.into_result(),
            Err(Error::CallbackFailure { partial_results: 2, .. })
        );
    }

    #[test]
    fn test_panic_is_reported_as_failure() {
        let registry: ObserverRegistry<f64> = ObserverRegistry::new();
        let default = registry.get_default_bound();

        registry.set_callback(move |sink| {
            sink.put(&default, 0.5);
            panic!("sensor went away");
        });

        let report = registry.collect();
        assert_eq!(report.points.len(), 1);
        let failure = report.failure.unwrap();
        assert!(failure.detail.contains("sensor went away"));
    }

    #[test]
    fn test_erase_preserves_points() {
        let registry: ObserverRegistry<i64> = ObserverRegistry::new();
        let default = registry.get_default_bound();
        registry.set_callback(move |sink| {
            sink.put(&default, 9);
            Ok(())
        });

        let report = registry.collect().erase();
        assert_eq!(
            report.value_for(&LabelSet::empty()),
            Some(&Observation::Integer(9))
        );
    }

    #[test]
    fn test_failure_converts_to_error() {
        let failure = CycleFailure {
            cycle_id: 3,
            partial_results: 1,
            detail: "boom".to_string(),
        };
        let err: Error = failure.into();
        assert_eq!(
            err.to_string(),
            "Callback failed in cycle 3 after 1 results: boom"
        );
    }
}
