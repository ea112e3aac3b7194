use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::aggregate::FlushedMetric;
use crate::protocol::AggregationKind;

use super::MetricSink;

/// Publishes flushed metrics into a shared Prometheus registry, normally the
/// health registry, so they are served from the same /metrics endpoint.
///
/// SUM metrics become counters incremented by every window's total. The
/// other kinds become gauges holding the last window's value.
pub struct PrometheusSink {
    registry: Registry,
    series: Mutex<HashMap<String, Registered>>,
}

struct Registered {
    raw_name: Box<[u8]>,
    kind: AggregationKind,
    series: Series,
}

enum Series {
    Counter(IntCounter),
    Gauge(IntGauge),
}

impl Series {
    fn new(name: &str, kind: AggregationKind, help: String) -> prometheus::Result<Self> {
        let opts = Opts::new(name, help);
        match kind {
            AggregationKind::Sum => IntCounter::with_opts(opts).map(Self::Counter),
            _ => IntGauge::with_opts(opts).map(Self::Gauge),
        }
    }

    fn record(&self, value: u64) {
        match self {
            Self::Counter(counter) => counter.inc_by(value),
            Self::Gauge(gauge) => gauge.set(i64::try_from(value).unwrap_or(i64::MAX)),
        }
    }

    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Self::Counter(counter) => Box::new(counter.clone()),
            Self::Gauge(gauge) => Box::new(gauge.clone()),
        }
    }
}

impl PrometheusSink {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Number of series registered so far.
    pub fn len(&self) -> usize {
        self.series.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.lock().is_empty()
    }
}

impl MetricSink for PrometheusSink {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn emit(&self, metric: &FlushedMetric) -> Result<()> {
        let Some(name) = sanitize_metric_name(&metric.name, metric.kind) else {
            bail!(
                "metric name {:?} has no valid prometheus characters",
                metric.display_name()
            );
        };

        let mut series = self.series.lock();
        if let Some(existing) = series.get(&name) {
            if existing.kind != metric.kind {
                bail!(
                    "prometheus name {name} already registered as {}, got {}",
                    existing.kind,
                    metric.kind
                );
            }
            if existing.raw_name != metric.name {
                bail!(
                    "metric {:?} collides with {:?} as prometheus name {name}",
                    metric.display_name(),
                    String::from_utf8_lossy(&existing.raw_name)
                );
            }
            existing.series.record(metric.value);
            return Ok(());
        }

        let help = format!("{} of {} per window", metric.kind, metric.display_name());
        let created = Series::new(&name, metric.kind, help)
            .with_context(|| format!("creating series {name}"))?;
        self.registry
            .register(created.collector())
            .with_context(|| format!("registering series {name}"))?;
        created.record(metric.value);
        series.insert(
            name,
            Registered {
                raw_name: metric.name.clone(),
                kind: metric.kind,
                series: created,
            },
        );

        Ok(())
    }
}

/// Maps a raw metric name onto the Prometheus name charset.
///
/// Dots become underscores, characters outside `[a-zA-Z0-9_:]` are removed,
/// and leading digits are dropped. SUM metrics lose a trailing `_total`.
/// Returns `None` when nothing usable remains.
pub fn sanitize_metric_name(raw: &[u8], kind: AggregationKind) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        let c = if b == b'.' { '_' } else { char::from(b) };
        if !(c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            continue;
        }
        if out.is_empty() && c.is_ascii_digit() {
            continue;
        }
        out.push(c);
    }

    if kind == AggregationKind::Sum {
        if let Some(stripped) = out.strip_suffix("_total") {
            out.truncate(stripped.len());
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
