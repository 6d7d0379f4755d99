use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use self_scan_rs::config::{OverflowPolicy, QueueConfig, RetryPolicy, ScanConfig};
use self_scan_rs::scanner::PortScanner;
use self_scan_rs::server;
use self_scan_rs::service::ScanService;
use self_scan_rs::store::{FileStore, MemoryStore, ResultStore};

/// self-scan-rs — queues full TCP port sweeps of whoever asks and serves back the results.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "self-scan-rs",
    version,
    about = "Queues full-range TCP connect scans of requesting addresses and serves the reports.",
    long_about = None
)]
struct Cli {
    /// Address for the HTTP API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Result store file (JSON).
    #[arg(long, default_value = "cgiscan.json")]
    db: PathBuf,

    /// Keep results in memory only; ignores --db.
    #[arg(long = "memory-store", default_value_t = false)]
    memory_store: bool,

    /// Ports scanned in parallel per target.
    #[arg(short = 'n', long, default_value_t = 32)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "connect-timeout-ms", default_value_t = 1000)]
    connect_timeout_ms: u64,

    /// Banner read timeout in milliseconds.
    #[arg(long = "read-timeout-ms", default_value_t = 1000)]
    read_timeout_ms: u64,

    /// Maximum banner bytes kept per port.
    #[arg(long = "banner-len", default_value_t = 128)]
    banner_len: usize,

    /// Pause before retrying a port that failed with "no route to host".
    #[arg(long = "retry-backoff-ms", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Attempts per port while failures stay transient (0 = unbounded).
    #[arg(long = "max-retries", default_value_t = 10)]
    max_retries: u32,

    /// Maximum number of waiting scans.
    #[arg(long = "max-queue", default_value_t = 1024)]
    max_queue: usize,

    /// What to do when a new request arrives and the queue is full.
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Reject)]
    overflow: OverflowPolicy,

    /// Unix socket path accepting one IP per connection for manual queueing.
    #[arg(long)]
    qsock: Option<PathBuf>,

    /// Print debugging messages.
    #[arg(short = 'd', long, default_value_t = false)]
    debug: bool,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            concurrency: self.concurrency,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            banner_len: self.banner_len,
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
        }
    }

    fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_len: self.max_queue,
            overflow: self.overflow,
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let (store, store_desc): (Arc<dyn ResultStore>, String) = if cli.memory_store {
        (Arc::new(MemoryStore::new()), "<memory>".to_string())
    } else {
        let file = FileStore::open(&cli.db)
            .with_context(|| format!("unable to open database {}", cli.db.display()))?;
        let desc = file.path().display().to_string();
        (Arc::new(file), desc)
    };
    info!(
        listen = %cli.listen,
        store = %store_desc,
        concurrency = cli.concurrency,
        connect_timeout_ms = cli.connect_timeout_ms,
        read_timeout_ms = cli.read_timeout_ms,
        max_retries = cli.max_retries,
        max_queue = cli.max_queue,
        overflow = ?cli.overflow,
        "self-scan-rs configuration"
    );

    let service = ScanService::new(cli.queue_config(), store);
    let scanner = PortScanner::new(cli.scan_config());
    let cancel = CancellationToken::new();

    // Ctrl-C stops accepting work; a running scan still finishes.
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        cancel_ctrlc.cancel();
    });

    let mut scan_loop = {
        let svc = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { svc.run(scanner, cancel).await })
    };

    #[cfg(unix)]
    if let Some(path) = cli.qsock.clone() {
        let svc = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = self_scan_rs::qsock::serve_qsock(&path, svc, cancel).await {
                error!("local queue socket error: {e:#}");
            }
        });
    }
    #[cfg(not(unix))]
    if cli.qsock.is_some() {
        warn!("--qsock is only supported on Unix; ignoring");
    }

    let served = server::spawn_server(&cli.listen.to_string(), service.clone(), cancel.clone()).await;
    cancel.cancel();

    if !service.queue().snapshot().in_flight.is_empty() {
        info!("waiting for the running scan to finish (Ctrl+C again to abort)");
    }
    tokio::select! {
        res = &mut scan_loop => {
            if let Err(e) = res {
                warn!("scan loop ended abnormally: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("aborting running scan");
            scan_loop.abort();
        }
    }

    served
}
