use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::aggregate::FlushedMetric;

use super::MetricSink;

/// Emits one structured `info` event per flushed metric.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn emit(&self, metric: &FlushedMetric) -> Result<()> {
        let window_end: DateTime<Utc> = metric.window_end.into();
        tracing::info!(
            metric = %metric.display_name(),
            kind = %metric.kind,
            value = metric.value,
            samples = metric.sample_count,
            window_end = %window_end.to_rfc3339(),
            "metric flushed",
        );
        Ok(())
    }
}
