use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "udpmetrics";

/// Prometheus metrics describing the collector itself.
///
/// All metrics use the "udpmetrics" namespace. The registry is shared with
/// the Prometheus output sink, so flushed application metrics appear on the
/// same /metrics endpoint.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    // === Ingest ===
    /// Total datagrams read from the socket.
    pub packets_received: Counter,
    /// Datagrams rejected before aggregation, by reason.
    pub packets_dropped: CounterVec,
    /// Samples folded into an accumulator.
    pub samples_recorded: Counter,
    /// Samples whose kind disagreed with the accumulator's stored kind.
    pub kind_mismatches: Counter,
    /// Accumulator state violations (finalize twice, apply after finalize).
    pub invariant_violations: Counter,

    // === Flush ===
    /// Windows closed and handed to the emitter.
    pub windows_flushed: Counter,
    /// Metrics emitted across all windows.
    pub metrics_flushed: Counter,
    /// Failed emit calls by sink.
    pub emit_errors: CounterVec,
    /// Time to emit one closed window to every sink.
    pub flush_duration: Histogram,
    /// Distinct metric names in the most recently closed window.
    pub window_metrics: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let packets_received = Counter::with_opts(
            Opts::new(
                "packets_received_total",
                "Total datagrams read from the UDP socket.",
            )
            .namespace(NAMESPACE),
        )?;
        let packets_dropped = CounterVec::new(
            Opts::new(
                "packets_dropped_total",
                "Total datagrams dropped before aggregation by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let samples_recorded = Counter::with_opts(
            Opts::new(
                "samples_recorded_total",
                "Total samples folded into an accumulator.",
            )
            .namespace(NAMESPACE),
        )?;
        let kind_mismatches = Counter::with_opts(
            Opts::new(
                "kind_mismatches_total",
                "Samples whose aggregation kind differed from the stored kind.",
            )
            .namespace(NAMESPACE),
        )?;
        let invariant_violations = Counter::with_opts(
            Opts::new(
                "invariant_violations_total",
                "Accumulator state violations detected during record or flush.",
            )
            .namespace(NAMESPACE),
        )?;

        let windows_flushed = Counter::with_opts(
            Opts::new("windows_flushed_total", "Total aggregation windows flushed.")
                .namespace(NAMESPACE),
        )?;
        let metrics_flushed = Counter::with_opts(
            Opts::new("metrics_flushed_total", "Total metrics emitted to sinks.")
                .namespace(NAMESPACE),
        )?;
        let emit_errors = CounterVec::new(
            Opts::new("emit_errors_total", "Total failed metric emits by sink.")
                .namespace(NAMESPACE),
            &["sink"],
        )?;
        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flush_duration_seconds",
                "Time to emit one closed window to every sink.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        let window_metrics = Gauge::with_opts(
            Opts::new(
                "window_metrics",
                "Distinct metric names in the most recently closed window.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(packets_received.clone()))?;
        registry.register(Box::new(packets_dropped.clone()))?;
        registry.register(Box::new(samples_recorded.clone()))?;
        registry.register(Box::new(kind_mismatches.clone()))?;
        registry.register(Box::new(invariant_violations.clone()))?;
        registry.register(Box::new(windows_flushed.clone()))?;
        registry.register(Box::new(metrics_flushed.clone()))?;
        registry.register(Box::new(emit_errors.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;
        registry.register(Box::new(window_metrics.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            packets_received,
            packets_dropped,
            samples_recorded,
            kind_mismatches,
            invariant_violations,
            windows_flushed,
            metrics_flushed,
            emit_errors,
            flush_duration,
            window_metrics,
        })
    }

    /// Registry backing /metrics. Cheap to clone.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz. Returns the
    /// bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("listening on {}", self.addr))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

fn render_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
