use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregate::{ActiveTable, FlushEmitter, WindowScheduler};
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::ingest::{Ingestor, UdpServer};
use crate::sink::{LogSink, MetricSink, PrometheusSink, StdoutSink};

/// Background tasks spawned by [`Collector::start`].
struct Tasks {
    ingest: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    emitter: JoinHandle<()>,
}

/// Collector wires ingestion, windowing, flushing and the health server.
pub struct Collector {
    cfg: Config,
    health: Arc<HealthMetrics>,
    active: Arc<ActiveTable>,
    extra_sinks: Vec<Box<dyn MetricSink>>,
    ingest_cancel: CancellationToken,
    scheduler_cancel: CancellationToken,
    tasks: Option<Tasks>,
    udp_addr: Option<SocketAddr>,
    health_addr: Option<SocketAddr>,
}

impl Collector {
    /// Creates a new Collector, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            active: Arc::new(ActiveTable::new(SystemTime::now())),
            extra_sinks: Vec::new(),
            ingest_cancel: CancellationToken::new(),
            scheduler_cancel: CancellationToken::new(),
            tasks: None,
            udp_addr: None,
            health_addr: None,
        })
    }

    /// Adds a sink on top of the configured outputs. Must be called before
    /// [`Collector::start`].
    pub fn with_sink(mut self, sink: Box<dyn MetricSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// Bound UDP address, once started.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// Bound health server address, once started with health enabled.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// Start all components and begin accepting datagrams.
    pub async fn start(&mut self) -> Result<()> {
        if self.tasks.is_some() {
            anyhow::bail!("collector already started");
        }

        // 0. Bind UDP before starting anything else so a bad address fails
        // fast and leaves no server behind.
        let ingestor = Ingestor::new(
            Arc::clone(&self.active),
            Arc::clone(&self.health),
            self.cfg.listen.max_datagram_size,
            self.cfg.aggregation.max_name_len,
        );
        let server = UdpServer::bind(&self.cfg.listen.bind, ingestor).await?;
        let udp_addr = server.local_addr()?;

        // 1. Health server.
        if self.cfg.health.enabled {
            let addr = self
                .health
                .start()
                .await
                .context("starting health metrics server")?;
            self.health_addr = Some(addr);
        }
        self.udp_addr = Some(udp_addr);

        // 2. Flush emitter.
        let sinks = self.build_sinks();
        let emitter = FlushEmitter::new(sinks, Arc::clone(&self.health));
        info!(sinks = ?emitter.sink_names(), "flush emitter configured");
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let emitter = tokio::spawn(emitter.run(flush_rx));

        // 3. Window scheduler.
        let scheduler = WindowScheduler::new(
            Arc::clone(&self.active),
            self.cfg.aggregation.window,
            flush_tx,
            Arc::clone(&self.health),
        );
        let scheduler = tokio::spawn(scheduler.run(self.scheduler_cancel.clone()));

        // 4. Ingestion. The first window starts now, not at construction.
        drop(self.active.drain_and_replace(SystemTime::now()));
        let ingest = tokio::spawn(server.run(self.ingest_cancel.clone()));

        self.tasks = Some(Tasks {
            ingest,
            scheduler,
            emitter,
        });

        info!(
            udp = %udp_addr,
            window = ?self.cfg.aggregation.window,
            "collector started",
        );

        Ok(())
    }

    /// Stops ingestion, flushes the open window and waits until every queued
    /// window has been emitted.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tasks) = self.tasks.take() {
            // Ingestion first so nothing lands after the final drain.
            self.ingest_cancel.cancel();
            if let Err(e) = tasks.ingest.await {
                error!(error = %e, "ingest task failed");
            }

            self.scheduler_cancel.cancel();
            if let Err(e) = tasks.scheduler.await {
                error!(error = %e, "scheduler task failed");
            }

            // Scheduler dropped the only flush sender; the emitter exits once
            // the queue is empty.
            if let Err(e) = tasks.emitter.await {
                error!(error = %e, "flush emitter task failed");
            }
        }

        self.health.stop();
        info!("collector stopped");

        Ok(())
    }

    fn build_sinks(&mut self) -> Vec<Box<dyn MetricSink>> {
        let output = &self.cfg.output;
        let mut sinks: Vec<Box<dyn MetricSink>> = Vec::new();

        if output.log {
            sinks.push(Box::new(LogSink));
        }
        if output.stdout {
            sinks.push(Box::new(StdoutSink::stdout()));
        }
        if output.prometheus {
            sinks.push(Box::new(PrometheusSink::new(self.health.registry().clone())));
        }
        sinks.append(&mut self.extra_sinks);

        sinks
    }
}
