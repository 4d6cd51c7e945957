//! Multi-observer sweep
//!
//! Runs every instrument of a meter once and folds the reports into an
//! [`ExportBatch`]. Observers are collected independently: a failing
//! callback only contributes a failure entry next to its partial records.

use tracing::debug;

use super::{InstrumentDescriptor, Meter};
use crate::export::{ExportBatch, ExportRecord, InstrumentFailure};
use crate::observer::{CycleReport, Observation};

/// Fold one instrument's report into `batch`
pub fn append_report(
    batch: &mut ExportBatch,
    descriptor: &InstrumentDescriptor,
    report: CycleReport<Observation>,
) {
    if let Some(failure) = report.failure {
        batch.failures.push(InstrumentFailure {
            instrument: descriptor.name.clone(),
            cycle_id: Some(failure.cycle_id),
            partial_results: failure.partial_results,
            detail: failure.detail,
        });
    }

    let timestamp = report.started_at;
    batch
        .records
        .extend(report.points.into_iter().map(|point| ExportRecord {
            instrument: descriptor.name.clone(),
            unit: descriptor.unit.clone(),
            labels: point.labels,
            value: point.value,
            timestamp,
        }));
}

impl Meter {
    /// Collect every instrument on the calling thread
    pub fn collect_all(&self) -> ExportBatch {
        let mut batch = ExportBatch::new(self.name());

        for instrument in self.instruments() {
            let report = instrument.collect_erased();
            append_report(&mut batch, instrument.descriptor(), report);
        }

        debug!(
            meter = %self.name(),
            records = batch.records.len(),
            failures = batch.failures.len(),
            "sweep complete"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::LabelSet;

    #[test]
    fn test_failing_observer_is_isolated() {
        let meter = Meter::new("test");

        let healthy = meter.i64_observer("healthy").with_unit("1").build().unwrap();
        let default = healthy.get_default_bound();
        healthy.set_callback(move |sink| {
            sink.put(&default, 1);
            Ok(())
        });

        let broken = meter.f64_observer("broken").build().unwrap();
        let partial = broken.bind(LabelSet::from([("stage", "early")]));
        broken.set_callback(move |sink| {
            sink.put(&partial, 0.25);
            anyhow::bail!("probe failed")
        });

        let batch = meter.collect_all();

        assert_eq!(batch.records_for("healthy").count(), 1);
        assert_eq!(batch.records_for("broken").count(), 1);
        assert_eq!(batch.failures.len(), 1);

        let failure = &batch.failures[0];
        assert_eq!(failure.instrument, "broken");
        assert_eq!(failure.partial_results, 1);
        assert!(failure.cycle_id.is_some());

        let record = batch.records_for("healthy").next().unwrap();
        assert_eq!(record.unit, "1");
        assert_eq!(record.value, Observation::Integer(1));
    }

    #[test]
    fn test_removed_observer_is_not_swept() {
        let meter = Meter::new("test");
        let gone = meter.i64_observer("gone").build().unwrap();
        let default = gone.get_default_bound();
        gone.set_callback(move |sink| {
            sink.put(&default, 1);
            Ok(())
        });

        meter.remove("gone");
        assert!(meter.collect_all().is_empty());
    }

    #[test]
    fn test_observer_without_callback_contributes_nothing() {
        let meter = Meter::new("test");
        meter.i64_observer("idle").build().unwrap();
        let batch = meter.collect_all();
        assert!(batch.records.is_empty());
        assert!(batch.failures.is_empty());
    }
}
