use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::aggregate::FlushedMetric;

use super::MetricSink;

/// Writes one line per flushed metric:
/// `<rfc3339 window_end> <kind> <name> <value>`.
///
/// Generic over the writer so tests can capture output in a `Vec<u8>`.
pub struct StdoutSink<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
}

impl StdoutSink<io::Stdout> {
    /// Sink writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> StdoutSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> MetricSink for StdoutSink<W> {
    fn name(&self) -> &str {
        "stdout"
    }

    fn emit(&self, metric: &FlushedMetric) -> Result<()> {
        let window_end: DateTime<Utc> = metric.window_end.into();
        let mut out = self.out.lock();
        writeln!(
            out,
            "{} {} {} {}",
            window_end.to_rfc3339_opts(SecondsFormat::Secs, true),
            metric.kind,
            metric.display_name(),
            metric.value,
        )
        .context("writing metric line")
    }

    fn end_window(&self) -> Result<()> {
        self.out.lock().flush().context("flushing metric lines")
    }
}
