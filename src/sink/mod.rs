//! Output boundary for flushed metrics.

mod log;
mod prometheus;
mod stdout;

pub use self::log::LogSink;
pub use self::prometheus::{sanitize_metric_name, PrometheusSink};
pub use self::stdout::StdoutSink;

use anyhow::Result;

use crate::aggregate::FlushedMetric;

/// Receives every finalized metric of a closed window.
///
/// Emit is called from the flush emitter task, once per metric per sink. An
/// error is reported and counted by the caller; it never stops the flush.
pub trait MetricSink: Send + Sync {
    /// Returns the sink's name for logging and the `sink` metric label.
    fn name(&self) -> &str;

    /// Deliver one flushed metric.
    fn emit(&self, metric: &FlushedMetric) -> Result<()>;

    /// Called once after every metric of a window has been emitted.
    fn end_window(&self) -> Result<()> {
        Ok(())
    }
}
