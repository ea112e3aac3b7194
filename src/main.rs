use std::net::UdpSocket;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use udpmetrics::collector::Collector;
use udpmetrics::config::Config;
use udpmetrics::protocol::{self, AggregationKind};

/// Windowed UDP metrics collector.
#[derive(Parser)]
#[command(name = "udpmetrics", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides the config file's log_level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Encode one sample and send it to a collector.
    Send {
        /// Aggregation kind: sum, average, peak or min.
        #[arg(short, long, value_parser = parse_kind)]
        kind: AggregationKind,

        /// Metric name.
        #[arg(short, long)]
        name: String,

        /// Sample value.
        #[arg(short = 'c', long, default_value_t = 1)]
        count: u32,

        /// Collector address.
        #[arg(short, long, default_value_t = format!("127.0.0.1:{}", protocol::DEFAULT_PORT))]
        addr: String,
    },

    /// Print version information and exit.
    Version,
}

fn parse_kind(s: &str) -> Result<AggregationKind, String> {
    AggregationKind::from_name(s)
        .ok_or_else(|| format!("unknown kind {s:?}, expected sum, average, peak or min"))
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("udpmetrics {}", version::full());
            return Ok(());
        }
        Some(Command::Send {
            kind,
            name,
            count,
            addr,
        }) => return send(kind, &name, count, &addr),
        None => {}
    }

    let cfg = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config from {}", path.display()))?
        }
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            cfg
        }
    };

    // Initialize tracing.
    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting udpmetrics",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

fn send(kind: AggregationKind, name: &str, count: u32, addr: &str) -> Result<()> {
    let packet = protocol::encode(kind, name.as_bytes(), count)?;

    let socket = UdpSocket::bind("0.0.0.0:0").context("binding client socket")?;
    socket
        .send_to(&packet, addr)
        .with_context(|| format!("sending to {addr}"))?;

    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    let mut collector = Collector::new(cfg)?;
    collector.start().await?;

    shutdown_signal().await?;

    collector.stop().await?;

    tracing::info!("udpmetrics stopped");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for SIGINT")?;
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}
