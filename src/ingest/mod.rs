//! UDP ingestion: receive, decode, record.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{ActiveTable, InvalidStateError, RecordOutcome};
use crate::export::health::HealthMetrics;
use crate::protocol::{self, DecodeError};

/// Why a datagram did not make it into the active table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("datagram exceeds {max} bytes")]
    Oversized { max: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
}

impl IngestError {
    /// Stable label used for drop accounting.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Oversized { .. } => "oversized",
            Self::Decode(e) => e.reason(),
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

/// Decodes datagrams and records them into the active window.
///
/// Socket-free so the pipeline can be driven directly in tests and benches.
pub struct Ingestor {
    active: Arc<ActiveTable>,
    health: Arc<HealthMetrics>,
    max_datagram_size: usize,
    max_name_len: usize,
}

impl Ingestor {
    pub fn new(
        active: Arc<ActiveTable>,
        health: Arc<HealthMetrics>,
        max_datagram_size: usize,
        max_name_len: usize,
    ) -> Self {
        Self {
            active,
            health,
            max_datagram_size,
            max_name_len,
        }
    }

    /// Largest datagram accepted.
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Handle one datagram. Rejections are counted and logged here; the
    /// returned error is informational.
    pub fn ingest(&self, datagram: &[u8]) -> Result<RecordOutcome, IngestError> {
        self.health.packets_received.inc();

        let result = self.record(datagram);
        match &result {
            Ok(RecordOutcome::KindMismatch { stored, received }) => {
                self.health.samples_recorded.inc();
                self.health.kind_mismatches.inc();
                tracing::warn!(
                    metric = %String::from_utf8_lossy(metric_name(datagram)),
                    stored = %stored,
                    received = %received,
                    "kind mismatch, applied under stored kind",
                );
            }
            Ok(_) => self.health.samples_recorded.inc(),
            Err(IngestError::InvalidState(e)) => {
                self.health.invariant_violations.inc();
                tracing::error!(error = %e, "accumulator invariant violated during record");
                debug_assert!(false, "accumulator invariant violated: {e}");
            }
            Err(e) => {
                self.health
                    .packets_dropped
                    .with_label_values(&[e.reason()])
                    .inc();
                tracing::debug!(size = datagram.len(), error = %e, "dropped datagram");
            }
        }

        result
    }

    fn record(&self, datagram: &[u8]) -> Result<RecordOutcome, IngestError> {
        if datagram.len() > self.max_datagram_size {
            return Err(IngestError::Oversized {
                max: self.max_datagram_size,
            });
        }
        let sample = protocol::decode(datagram, self.max_name_len)?;
        Ok(self.active.record_sample(&sample)?)
    }
}

fn metric_name(datagram: &[u8]) -> &[u8] {
    datagram.get(protocol::HEADER_LEN..).unwrap_or_default()
}

/// UDP receive loop feeding an [`Ingestor`].
pub struct UdpServer {
    socket: UdpSocket,
    ingestor: Ingestor,
}

impl UdpServer {
    /// Binds the UDP socket. Failure here is fatal to startup.
    pub async fn bind(addr: &str, ingestor: Ingestor) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("binding UDP socket on {addr}"))?;
        Ok(Self { socket, ingestor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("getting UDP local address")
    }

    /// Receives until cancelled. Per-datagram failures never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        // One spare byte so an oversized datagram is distinguishable from one
        // that exactly fills the limit.
        let mut buf = vec![0u8; self.ingestor.max_datagram_size() + 1];

        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(addr = %addr, "udp ingest started");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, _peer)) => {
                        let _ = self.ingestor.ingest(&buf[..len]);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "udp receive failed");
                    }
                },
            }
        }

        tracing::info!("udp ingest stopped");
    }
}
