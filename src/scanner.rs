use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ::time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::{RetryPolicy, ScanConfig};
use crate::error::ScanError;
use crate::report::build_report;
use crate::types::{PortResult, ScanOutcome};

/// Highest port swept. Every scan covers 1..=MAX_PORT.
pub const MAX_PORT: u16 = u16::MAX;

/// One connect-and-read attempt against a single socket address.
///
/// `Ok` means the port is open; the bytes are whatever it sent first, possibly none.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: SocketAddr) -> io::Result<Vec<u8>>;
}

/// Real TCP connect scan with a passive banner read.
#[derive(Debug, Clone)]
pub struct TcpProber {
    connect_timeout: Duration,
    read_timeout: Duration,
    banner_len: usize,
}

impl TcpProber {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            banner_len: config.banner_len,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: SocketAddr) -> io::Result<Vec<u8>> {
        let mut stream = match time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(res) => res?,
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };
        Ok(read_banner(&mut stream, self.banner_len, self.read_timeout).await)
    }
}

/// Read up to `len` bytes within `timeout`. A timeout, error or EOF all yield an empty banner.
async fn read_banner(stream: &mut TcpStream, len: usize, timeout: Duration) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    match time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => {
            buf.truncate(n);
            buf
        }
        _ => Vec::new(),
    }
}

/// Routing-layer failures ("no route to host") that say nothing about the port itself.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable
    )
}

/// Probe one port, retrying the same port on transient errors as `policy` allows.
///
/// Returns `None` when the port should be counted as closed.
pub async fn probe_with_retry(
    prober: &dyn Prober,
    addr: SocketAddr,
    policy: RetryPolicy,
) -> Option<Vec<u8>> {
    let mut failures: u32 = 0;
    loop {
        match prober.probe(addr).await {
            Ok(banner) => return Some(banner),
            Err(e) if is_transient(&e) => {
                failures = failures.saturating_add(1);
                if !policy.allows_retry(failures) {
                    debug!(%addr, failures, "giving up on port after transient errors");
                    return None;
                }
                time::sleep(policy.backoff).await;
            }
            Err(_) => return None,
        }
    }
}

/// Hands out each port in 1..=MAX_PORT to exactly one caller.
#[derive(Debug)]
struct PortSource {
    next: AtomicU32,
}

impl PortSource {
    fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    fn next_port(&self) -> Option<u16> {
        let p = self.next.fetch_add(1, Ordering::Relaxed);
        u16::try_from(p).ok().filter(|p| *p != 0)
    }
}

/// Full-range TCP connect scanner with a fixed worker pool.
#[derive(Clone)]
pub struct PortScanner {
    prober: Arc<dyn Prober>,
    config: ScanConfig,
}

impl PortScanner {
    pub fn new(config: ScanConfig) -> Self {
        let prober = Arc::new(TcpProber::new(&config));
        Self { prober, config }
    }

    pub fn with_prober(config: ScanConfig, prober: Arc<dyn Prober>) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Sweep every port of `address` and build the report.
    ///
    /// - Spawns `concurrency` workers that pull ports from one shared source.
    /// - Open ports flow through a channel to this task, which collects them.
    /// - Returns only after every worker has drained the source and every result is in.
    /// - Per-port failures never surface; only an unparsable address is an error.
    pub async fn scan(&self, address: &str) -> Result<ScanOutcome, ScanError> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| ScanError::InvalidAddress(address.to_string()))?;
        let workers = self.config.concurrency.clamp(1, usize::from(MAX_PORT));
        let start = Instant::now();
        debug!(%address, workers, "scanning");

        let source = Arc::new(PortSource::new());
        let (tx, mut rx) = mpsc::channel::<PortResult>(workers);
        let mut set = JoinSet::new();

        for _ in 0..workers {
            let source = source.clone();
            let tx = tx.clone();
            let prober = self.prober.clone();
            let retry = self.config.retry;
            let address = address.to_string();
            set.spawn(async move {
                while let Some(port) = source.next_port() {
                    if port % 10_000 == 0 {
                        debug!(%address, port, elapsed = ?start.elapsed(), "sweep progress");
                    }
                    let addr = SocketAddr::new(ip, port);
                    if let Some(banner) = probe_with_retry(prober.as_ref(), addr, retry).await {
                        if tx.send(PortResult { port, banner }).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
        // Channel closes once the last worker drops its sender
        drop(tx);

        let mut open_ports = BTreeMap::new();
        while let Some(res) = rx.recv().await {
            open_ports.insert(res.port, res.banner);
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(%address, error = %e, "scan worker failed");
            }
        }

        let elapsed = start.elapsed();
        let finished_at = OffsetDateTime::now_utc();
        debug!(%address, ?elapsed, open = open_ports.len(), "scanned");
        let report = build_report(&open_ports, finished_at);
        Ok(ScanOutcome {
            address: address.to_string(),
            open_ports,
            finished_at,
            elapsed,
            report,
        })
    }
}
