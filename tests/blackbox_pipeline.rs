use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use udpmetrics::aggregate::{ActiveTable, FlushEmitter, FlushedMetric};
use udpmetrics::collector::Collector;
use udpmetrics::config::Config;
use udpmetrics::export::health::HealthMetrics;
use udpmetrics::ingest::Ingestor;
use udpmetrics::protocol::{encode, AggregationKind, MAX_NAME_LEN};
use udpmetrics::sink::MetricSink;

/// Sink that keeps every emitted metric for inspection.
#[derive(Clone, Default)]
struct CaptureSink {
    seen: Arc<Mutex<Vec<FlushedMetric>>>,
}

impl CaptureSink {
    fn by_name(&self) -> BTreeMap<String, (AggregationKind, u64)> {
        self.seen
            .lock()
            .iter()
            .map(|m| (m.display_name().into_owned(), (m.kind, m.value)))
            .collect()
    }
}

impl MetricSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn emit(&self, metric: &FlushedMetric) -> anyhow::Result<()> {
        self.seen.lock().push(metric.clone());
        Ok(())
    }
}

/// Ingestor plus emitter without sockets or timers.
struct Pipeline {
    active: Arc<ActiveTable>,
    ingestor: Ingestor,
    emitter: FlushEmitter,
    capture: CaptureSink,
}

impl Pipeline {
    fn new() -> Self {
        let health = Arc::new(HealthMetrics::new("127.0.0.1:0").expect("metrics register"));
        let active = Arc::new(ActiveTable::new(SystemTime::now()));
        let ingestor = Ingestor::new(Arc::clone(&active), Arc::clone(&health), 512, MAX_NAME_LEN);
        let capture = CaptureSink::default();
        let emitter = FlushEmitter::new(vec![Box::new(capture.clone())], health);
        Self {
            active,
            ingestor,
            emitter,
            capture,
        }
    }

    fn send(&self, kind: AggregationKind, name: &str, count: u32) {
        let packet = encode(kind, name.as_bytes(), count).expect("valid packet");
        self.ingestor.ingest(&packet).expect("recorded");
    }

    fn close_window(&self) -> BTreeMap<String, (AggregationKind, u64)> {
        let now = SystemTime::now();
        self.emitter.flush(self.active.drain_and_replace(now), now);
        let out = self.capture.by_name();
        self.capture.seen.lock().clear();
        out
    }
}

fn expected(entries: &[(&str, AggregationKind, u64)]) -> BTreeMap<String, (AggregationKind, u64)> {
    entries
        .iter()
        .map(|(name, kind, value)| (name.to_string(), (*kind, *value)))
        .collect()
}

#[test]
fn sum_and_average_in_one_window() {
    let p = Pipeline::new();
    p.send(AggregationKind::Sum, "a", 10);
    p.send(AggregationKind::Sum, "a", 5);
    p.send(AggregationKind::Average, "b", 20);

    assert_eq!(
        p.close_window(),
        expected(&[
            ("a", AggregationKind::Sum, 15),
            ("b", AggregationKind::Average, 20),
        ])
    );
}

#[test]
fn peak_keeps_maximum() {
    let p = Pipeline::new();
    p.send(AggregationKind::Peak, "x", 3);
    p.send(AggregationKind::Peak, "x", 9);
    p.send(AggregationKind::Peak, "x", 1);

    assert_eq!(
        p.close_window(),
        expected(&[("x", AggregationKind::Peak, 9)])
    );
}

#[test]
fn empty_window_emits_nothing() {
    let p = Pipeline::new();
    assert!(p.close_window().is_empty());
}

#[test]
fn malformed_packet_is_dropped_and_ingestion_continues() {
    let p = Pipeline::new();
    assert!(p.ingestor.ingest(&[0x00, 0x2d, 0x00]).is_err());
    p.send(AggregationKind::Min, "y", 7);

    assert_eq!(
        p.close_window(),
        expected(&[("y", AggregationKind::Min, 7)])
    );
}

#[test]
fn windows_do_not_leak_into_each_other() {
    let p = Pipeline::new();
    p.send(AggregationKind::Sum, "a", 1);
    assert_eq!(
        p.close_window(),
        expected(&[("a", AggregationKind::Sum, 1)])
    );

    p.send(AggregationKind::Sum, "a", 2);
    p.send(AggregationKind::Min, "b", 4);
    assert_eq!(
        p.close_window(),
        expected(&[
            ("a", AggregationKind::Sum, 2),
            ("b", AggregationKind::Min, 4),
        ])
    );
}

fn collector_config() -> Config {
    let mut cfg = Config::default();
    cfg.listen.bind = "127.0.0.1:0".to_string();
    cfg.output.log = false;
    cfg.output.prometheus = true;
    cfg.health.addr = "127.0.0.1:0".to_string();
    cfg
}

async fn send_udp(addr: SocketAddr, kind: AggregationKind, name: &str, count: u32) {
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("client bind");
    let packet = encode(kind, name.as_bytes(), count).expect("valid packet");
    client.send_to(&packet, addr).await.expect("send");
}

async fn wait_for_samples(collector: &Collector, n: f64) {
    for _ in 0..200 {
        if collector.health().samples_recorded.get() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("collector did not record {n} samples");
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    reqwest::get(format!("http://{addr}{path}"))
        .await
        .expect("request")
        .text()
        .await
        .expect("response body")
}

#[tokio::test]
async fn udp_end_to_end_flushes_on_stop() {
    let capture = CaptureSink::default();
    let mut collector = Collector::new(collector_config())
        .expect("collector")
        .with_sink(Box::new(capture.clone()));
    collector.start().await.expect("start");
    let addr = collector.udp_addr().expect("udp bound");

    send_udp(addr, AggregationKind::Sum, "a", 10).await;
    send_udp(addr, AggregationKind::Sum, "a", 5).await;
    send_udp(addr, AggregationKind::Average, "b", 20).await;
    wait_for_samples(&collector, 3.0).await;

    collector.stop().await.expect("stop");

    assert_eq!(
        capture.by_name(),
        expected(&[
            ("a", AggregationKind::Sum, 15),
            ("b", AggregationKind::Average, 20),
        ])
    );
}

#[tokio::test]
async fn prometheus_output_is_served_on_health_endpoint() {
    let mut cfg = collector_config();
    cfg.aggregation.window = Duration::from_millis(200);
    let mut collector = Collector::new(cfg).expect("collector");
    collector.start().await.expect("start");
    let udp = collector.udp_addr().expect("udp bound");
    let http = collector.health_addr().expect("health bound");

    send_udp(udp, AggregationKind::Peak, "api.latency", 42).await;
    wait_for_samples(&collector, 1.0).await;

    let mut body = String::new();
    for _ in 0..50 {
        body = http_get(http, "/metrics").await;
        if body.contains("api_latency 42") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(body.contains("api_latency 42"), "metrics body: {body}");
    assert!(body.contains("udpmetrics_samples_recorded_total 1"));

    collector.stop().await.expect("stop");
}
