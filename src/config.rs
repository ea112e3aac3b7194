use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::protocol::{HEADER_LEN, MAX_NAME_LEN};

/// Top-level configuration for the udpmetrics collector.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// UDP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Windowed aggregation configuration.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Output sink selection.
    #[serde(default)]
    pub output: OutputConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// UDP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Socket address to bind. Default: "127.0.0.1:1113".
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest datagram accepted; longer ones are dropped. Default: 512.
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

/// Windowed aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Window length. Default: 60s.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Longest metric name accepted, in bytes. Default: 255.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

/// Output sink selection.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Emit each flushed metric as a structured log event. Default: true.
    #[serde(default = "default_true")]
    pub log: bool,

    /// Write one line per flushed metric to stdout. Default: false.
    #[serde(default)]
    pub stdout: bool,

    /// Publish flushed metrics as gauges on the health /metrics endpoint.
    /// Default: false.
    #[serde(default)]
    pub prometheus: bool,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address. Default: "127.0.0.1:9113".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    format!("127.0.0.1:{}", crate::protocol::DEFAULT_PORT)
}

fn default_max_datagram_size() -> usize {
    512
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_name_len() -> usize {
    MAX_NAME_LEN
}

fn default_true() -> bool {
    true
}

fn default_health_addr() -> String {
    "127.0.0.1:9113".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen: ListenConfig::default(),
            aggregation: AggregationConfig::default(),
            output: OutputConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_name_len: default_max_name_len(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log: true,
            stdout: false,
            prometheus: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            bail!("log_level must not be empty");
        }

        self.listen
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("listen.bind is not a socket address: {}", self.listen.bind))?;

        if self.listen.max_datagram_size <= HEADER_LEN {
            bail!(
                "listen.max_datagram_size must be greater than the {HEADER_LEN}-byte header, got {}",
                self.listen.max_datagram_size
            );
        }
        if self.listen.max_datagram_size > u16::MAX as usize {
            bail!(
                "listen.max_datagram_size must be at most {}, got {}",
                u16::MAX,
                self.listen.max_datagram_size
            );
        }

        if self.aggregation.window.is_zero() {
            bail!("aggregation.window must be positive");
        }

        let max_name_len = self.aggregation.max_name_len;
        if max_name_len == 0 || max_name_len > MAX_NAME_LEN {
            bail!("aggregation.max_name_len must be between 1 and {MAX_NAME_LEN}, got {max_name_len}");
        }
        if HEADER_LEN + max_name_len > self.listen.max_datagram_size {
            bail!(
                "aggregation.max_name_len {max_name_len} does not fit in listen.max_datagram_size {}",
                self.listen.max_datagram_size
            );
        }

        if !self.output.log && !self.output.stdout && !self.output.prometheus {
            bail!("at least one of output.log, output.stdout, output.prometheus must be enabled");
        }

        if self.output.prometheus && !self.health.enabled {
            bail!("output.prometheus requires health.enabled");
        }

        if self.health.enabled {
            self.health
                .addr
                .parse::<SocketAddr>()
                .with_context(|| format!("health.addr is not a socket address: {}", self.health.addr))?;
        }

        Ok(())
    }
}
