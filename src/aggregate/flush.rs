use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::mpsc;

use crate::export::health::HealthMetrics;
use crate::protocol::AggregationKind;
use crate::sink::MetricSink;

use super::scheduler::ClosedWindow;
use super::table::AccumulatorTable;

/// One finalized metric of a closed window, as delivered to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedMetric {
    pub name: Box<[u8]>,
    pub kind: AggregationKind,
    pub value: u64,
    pub sample_count: u64,
    pub window_end: SystemTime,
}

impl FlushedMetric {
    /// Name for human-facing output. Invalid UTF-8 is replaced.
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Outcome of flushing one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Metrics finalized and offered to the sinks.
    pub metrics: usize,
    /// Samples folded into those metrics.
    pub samples: u64,
    /// Failed emit calls, summed over sinks.
    pub emit_errors: usize,
    /// Accumulators that could not be finalized.
    pub invariant_violations: usize,
}

/// Finalizes drained tables and delivers every metric to every sink.
pub struct FlushEmitter {
    sinks: Vec<Box<dyn MetricSink>>,
    health: Arc<HealthMetrics>,
}

impl FlushEmitter {
    pub fn new(sinks: Vec<Box<dyn MetricSink>>, health: Arc<HealthMetrics>) -> Self {
        Self { sinks, health }
    }

    /// Names of the configured sinks, in emit order.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Flush one detached table. A failing sink or accumulator is logged and
    /// counted; the remaining entries and sinks are still processed.
    pub fn flush(&self, table: AccumulatorTable, window_end: SystemTime) -> FlushReport {
        let started = Instant::now();
        let window_start = table.window_start();
        let mut report = FlushReport::default();

        for (name, mut acc) in table.into_entries() {
            let value = match acc.finalize() {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(
                        metric = %String::from_utf8_lossy(&name),
                        error = %e,
                        "accumulator invariant violated during flush",
                    );
                    self.health.invariant_violations.inc();
                    report.invariant_violations += 1;
                    debug_assert!(false, "accumulator invariant violated: {e}");
                    continue;
                }
            };

            let metric = FlushedMetric {
                name,
                kind: acc.kind(),
                value,
                sample_count: acc.sample_count(),
                window_end,
            };
            report.metrics += 1;
            report.samples += metric.sample_count;

            for sink in &self.sinks {
                if let Err(e) = sink.emit(&metric) {
                    tracing::error!(
                        sink = sink.name(),
                        metric = %metric.display_name(),
                        error = %e,
                        "metric emit failed",
                    );
                    self.health
                        .emit_errors
                        .with_label_values(&[sink.name()])
                        .inc();
                    report.emit_errors += 1;
                }
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.end_window() {
                tracing::error!(sink = sink.name(), error = %e, "sink window flush failed");
                self.health
                    .emit_errors
                    .with_label_values(&[sink.name()])
                    .inc();
                report.emit_errors += 1;
            }
        }

        let elapsed = started.elapsed();
        self.health.windows_flushed.inc();
        self.health.metrics_flushed.inc_by(report.metrics as f64);
        self.health.flush_duration.observe(elapsed.as_secs_f64());

        let window_secs = window_end
            .duration_since(window_start)
            .unwrap_or_default()
            .as_secs_f64();
        tracing::debug!(
            metrics = report.metrics,
            samples = report.samples,
            emit_errors = report.emit_errors,
            window_secs,
            elapsed_us = elapsed.as_micros() as u64,
            "flushed window",
        );

        report
    }

    /// Flushes closed windows until every sender is dropped, so windows
    /// queued before shutdown are still emitted.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ClosedWindow>) {
        let mut windows = 0u64;
        while let Some(closed) = rx.recv().await {
            self.flush(closed.table, closed.window_end);
            windows += 1;
        }
        tracing::info!(windows, "flush emitter stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::bail;
    use parking_lot::Mutex;

    use super::*;
    use crate::aggregate::Accumulator;
    use crate::protocol::Sample;

    /// Captures emitted metrics; fails for any name listed in `fail_on`.
    #[derive(Default)]
    struct RecordingSink {
        fail_on: Vec<&'static [u8]>,
        seen: Mutex<Vec<FlushedMetric>>,
    }

    impl MetricSink for Arc<RecordingSink> {
        fn name(&self) -> &str {
            "recording"
        }

        fn emit(&self, metric: &FlushedMetric) -> anyhow::Result<()> {
            if self.fail_on.iter().any(|n| **n == *metric.name) {
                bail!("refusing {}", metric.display_name());
            }
            self.seen.lock().push(metric.clone());
            Ok(())
        }
    }

    fn health() -> Arc<HealthMetrics> {
        Arc::new(HealthMetrics::new("127.0.0.1:0").expect("metrics register"))
    }

    fn table_with(samples: &[(AggregationKind, &'static str, u32)]) -> AccumulatorTable {
        let table = AccumulatorTable::new(SystemTime::UNIX_EPOCH);
        for (kind, name, count) in samples {
            table
                .record_sample(&Sample {
                    kind: *kind,
                    name: name.as_bytes(),
                    count: *count,
                })
                .expect("open accumulator");
        }
        table
    }

    fn sorted(mut metrics: Vec<FlushedMetric>) -> Vec<FlushedMetric> {
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    #[test]
    fn test_flush_delivers_every_metric() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = FlushEmitter::new(vec![Box::new(Arc::clone(&sink))], health());
        let window_end = SystemTime::UNIX_EPOCH + Duration::from_secs(60);

        let report = emitter.flush(
            table_with(&[
                (AggregationKind::Sum, "a", 10),
                (AggregationKind::Sum, "a", 5),
                (AggregationKind::Average, "b", 20),
            ]),
            window_end,
        );

        assert_eq!(
            report,
            FlushReport {
                metrics: 2,
                samples: 3,
                emit_errors: 0,
                invariant_violations: 0,
            }
        );

        let seen = sorted(sink.seen.lock().clone());
        assert_eq!(seen.len(), 2);
        assert_eq!(&*seen[0].name, b"a");
        assert_eq!(seen[0].kind, AggregationKind::Sum);
        assert_eq!(seen[0].value, 15);
        assert_eq!(seen[0].sample_count, 2);
        assert_eq!(seen[0].window_end, window_end);
        assert_eq!(&*seen[1].name, b"b");
        assert_eq!(seen[1].value, 20);
    }

    #[test]
    fn test_emit_error_does_not_abort_flush() {
        let failing = Arc::new(RecordingSink {
            fail_on: vec![&b"bad"[..]],
            ..Default::default()
        });
        let healthy = Arc::new(RecordingSink::default());
        let health = health();
        let emitter = FlushEmitter::new(
            vec![
                Box::new(Arc::clone(&failing)),
                Box::new(Arc::clone(&healthy)),
            ],
            Arc::clone(&health),
        );

        let report = emitter.flush(
            table_with(&[
                (AggregationKind::Peak, "bad", 1),
                (AggregationKind::Peak, "good", 2),
                (AggregationKind::Peak, "fine", 3),
            ]),
            SystemTime::now(),
        );

        assert_eq!(report.metrics, 3);
        assert_eq!(report.emit_errors, 1);
        assert_eq!(failing.seen.lock().len(), 2);
        assert_eq!(healthy.seen.lock().len(), 3);
        assert_eq!(
            health.emit_errors.with_label_values(&["recording"]).get(),
            1.0
        );
    }

    #[test]
    fn test_empty_window_emits_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let health = health();
        let emitter = FlushEmitter::new(vec![Box::new(Arc::clone(&sink))], Arc::clone(&health));

        let report = emitter.flush(AccumulatorTable::new(SystemTime::now()), SystemTime::now());

        assert_eq!(report, FlushReport::default());
        assert!(sink.seen.lock().is_empty());
        assert_eq!(health.windows_flushed.get(), 1.0);
    }

    fn table_with_finalized(name: &str) -> AccumulatorTable {
        let table = table_with(&[(AggregationKind::Sum, "ok", 1)]);
        let mut acc = Accumulator::with_first(AggregationKind::Peak, 3);
        acc.finalize().expect("first finalize");
        table.insert(name.as_bytes(), acc);
        table
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "accumulator invariant violated")]
    fn test_finalized_accumulator_panics_in_debug() {
        let emitter = FlushEmitter::new(Vec::new(), health());
        emitter.flush(table_with_finalized("stale"), SystemTime::now());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_finalized_accumulator_is_counted_and_skipped() {
        let health = health();
        let emitter = FlushEmitter::new(Vec::new(), Arc::clone(&health));

        let report = emitter.flush(table_with_finalized("stale"), SystemTime::now());

        assert_eq!(report.metrics, 1);
        assert_eq!(report.invariant_violations, 1);
        assert_eq!(health.invariant_violations.get(), 1.0);
    }

    #[tokio::test]
    async fn test_run_drains_queue_after_senders_drop() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = FlushEmitter::new(vec![Box::new(Arc::clone(&sink))], health());
        let (tx, rx) = mpsc::unbounded_channel();

        for name in ["w1", "w2", "w3"] {
            tx.send(ClosedWindow {
                table: table_with(&[(AggregationKind::Min, name, 7)]),
                window_end: SystemTime::now(),
            })
            .expect("receiver alive");
        }
        drop(tx);

        emitter.run(rx).await;
        assert_eq!(sink.seen.lock().len(), 3);
    }
}
