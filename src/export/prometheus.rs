//! Prometheus Exporter
//!
//! Mirrors the latest batch into a `prometheus::Registry` of gauge vectors
//! and renders it in the text exposition format.
//!
//! Observed values are last-value snapshots, so every instrument becomes a
//! gauge family. Families absent from the latest batch are unregistered.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, warn};

use super::{ExportBatch, ExportRecord, MetricExporter};
use crate::error::{Error, Result};

struct Family {
    label_names: Vec<String>,
    gauges: GaugeVec,
}

/// Exporter backing a `/metrics` scrape endpoint
pub struct PrometheusExporter {
    namespace: Option<String>,
    registry: Registry,
    families: Mutex<HashMap<String, Family>>,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            namespace: None,
            registry: Registry::new(),
            families: Mutex::new(HashMap::new()),
        }
    }

    /// Prefix every metric name with `namespace_`
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(sanitize(&namespace.into())),
            ..Self::new()
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Content type of [`render`](Self::render) output
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Render the current state in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Prometheus output is not UTF-8: {}", e)))
    }

    fn metric_name(&self, instrument: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, sanitize(instrument)),
            None => sanitize(instrument),
        }
    }

    fn apply(&self, batch: &ExportBatch) -> Result<()> {
        let mut grouped: BTreeMap<&str, Vec<&ExportRecord>> = BTreeMap::new();
        for record in &batch.records {
            grouped.entry(record.instrument.as_str()).or_default().push(record);
        }

        // Distinct instruments may sanitise to one metric name; the first in
        // name order owns it
        let mut claimed: BTreeMap<String, (&str, Vec<&ExportRecord>)> = BTreeMap::new();
        for (instrument, records) in grouped {
            match claimed.entry(self.metric_name(instrument)) {
                Entry::Vacant(slot) => {
                    slot.insert((instrument, records));
                }
                Entry::Occupied(slot) => {
                    warn!(
                        instrument,
                        metric = %slot.key(),
                        owner = slot.get().0,
                        "metric name already exported by another instrument, skipping"
                    );
                }
            }
        }

        let mut families = self.families.lock();

        let stale: Vec<String> = families
            .keys()
            .filter(|metric| !claimed.contains_key(metric.as_str()))
            .cloned()
            .collect();
        for metric in stale {
            if let Some(family) = families.remove(&metric) {
                self.unregister(&metric, &family);
            }
        }

        let mut errors = Vec::new();
        for (metric, (instrument, records)) in claimed {
            if let Err(e) = self.apply_family(&mut families, &metric, instrument, &records) {
                warn!(instrument, metric = %metric, error = %e, "failed to update gauge family");
                errors.push(format!("{}: {}", instrument, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(errors.join("; ")))
        }
    }

    fn apply_family(
        &self,
        families: &mut HashMap<String, Family>,
        metric: &str,
        instrument: &str,
        records: &[&ExportRecord],
    ) -> Result<()> {
        let label_names: Vec<String> = records
            .iter()
            .flat_map(|r| r.labels.keys().map(sanitize))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let reusable = families
            .get(metric)
            .is_some_and(|f| f.label_names == label_names);

        if !reusable {
            if let Some(old) = families.remove(metric) {
                self.unregister(metric, &old);
            }
            let unit = records.first().map(|r| r.unit.as_str()).unwrap_or_default();
            let family = self.register(metric, instrument, unit, label_names)?;
            families.insert(metric.to_string(), family);
        }

        let Some(family) = families.get(metric) else {
            return Ok(());
        };
        if reusable {
            family.gauges.reset();
        }
        for record in records {
            set_sample(family, record)?;
        }
        Ok(())
    }

    fn register(
        &self,
        metric: &str,
        instrument: &str,
        unit: &str,
        label_names: Vec<String>,
    ) -> Result<Family> {
        let help = if unit.is_empty() {
            format!("Observed value of {}", instrument)
        } else {
            format!("Observed value of {} ({})", instrument, unit)
        };
        let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let gauges = GaugeVec::new(Opts::new(metric, help), &names)?;
        self.registry.register(Box::new(gauges.clone()))?;
        debug!(instrument, metric, labels = ?label_names, "registered gauge family");

        Ok(Family {
            label_names,
            gauges,
        })
    }

    fn unregister(&self, metric: &str, family: &Family) {
        if let Err(e) = self.registry.unregister(Box::new(family.gauges.clone())) {
            warn!(metric, error = %e, "failed to unregister gauge family");
        }
    }
}

fn set_sample(family: &Family, record: &ExportRecord) -> Result<()> {
    let by_name: HashMap<String, &str> = record.labels.iter().map(|(k, v)| (sanitize(k), v)).collect();
    let values: Vec<&str> = family
        .label_names
        .iter()
        .map(|name| by_name.get(name).copied().unwrap_or(""))
        .collect();

    family
        .gauges
        .get_metric_with_label_values(values.as_slice())?
        .set(record.value.as_f64());
    Ok(())
}

/// Map an arbitrary name onto `[a-zA-Z_][a-zA-Z0-9_]*`
fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    // Names starting with "__" are reserved
    while out.starts_with("__") {
        out.remove(0);
    }
    out
}

#[async_trait]
impl MetricExporter for PrometheusExporter {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn export(&self, batch: &ExportBatch) -> Result<()> {
        self.apply(batch).map_err(|e| Error::Export {
            exporter: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}
