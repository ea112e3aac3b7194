use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::export::health::HealthMetrics;

use super::table::{AccumulatorTable, ActiveTable};

/// A detached table on its way to the flush emitter.
pub struct ClosedWindow {
    pub table: AccumulatorTable,
    pub window_end: SystemTime,
}

/// Closes the active window on a fixed period.
///
/// Every tick fires, even for an empty window. Ticks missed because the
/// runtime was stalled are skipped rather than replayed.
pub struct WindowScheduler {
    active: Arc<ActiveTable>,
    window: Duration,
    flush_tx: mpsc::UnboundedSender<ClosedWindow>,
    health: Arc<HealthMetrics>,
}

impl WindowScheduler {
    pub fn new(
        active: Arc<ActiveTable>,
        window: Duration,
        flush_tx: mpsc::UnboundedSender<ClosedWindow>,
        health: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            active,
            window,
            flush_tx,
            health,
        }
    }

    /// Drains the active table and queues it for flushing. Never waits on
    /// the emitter.
    pub fn close_window(&self) {
        let window_end = SystemTime::now();
        let table = self.active.drain_and_replace(window_end);
        let names = table.len();
        self.health.window_metrics.set(names as f64);

        tracing::debug!(names, "window closed");

        if self
            .flush_tx
            .send(ClosedWindow { table, window_end })
            .is_err()
        {
            tracing::warn!(names, "flush emitter gone, dropping closed window");
        }
    }

    /// Ticks until cancelled, then closes the final partial window. The
    /// flush sender is dropped on return, which lets the emitter finish.
    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.window;
        let mut ticker = tokio::time::interval_at(start, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(window = ?self.window, "window scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close_window();
                    tracing::info!("window scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.close_window();
                }
            }
        }
    }
}
