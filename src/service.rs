use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::average::AverageTracker;
use crate::config::QueueConfig;
use crate::error::{AdmissionError, StoreError};
use crate::queue::AdmissionQueue;
use crate::scanner::PortScanner;
use crate::store::ResultStore;
use crate::types::{Admission, ScanState};

/// Counters shown alongside every status answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub uptime: Duration,
    pub completed_scans: u64,
    pub average_scan_time: Duration,
    pub queue_len: usize,
}

/// Owns the queue, the duration tracker and the result store.
///
/// Cheap to clone; every clone shares the same state. Construct one per
/// server and hand it to the request handlers and the scan loop.
#[derive(Clone)]
pub struct ScanService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    queue: AdmissionQueue,
    averages: AverageTracker,
    store: Arc<dyn ResultStore>,
    started: Instant,
}

impl ScanService {
    pub fn new(queue_config: QueueConfig, store: Arc<dyn ResultStore>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                queue: AdmissionQueue::new(queue_config),
                averages: AverageTracker::new(),
                store,
                started: Instant::now(),
            }),
        }
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.inner.queue
    }

    pub fn averages(&self) -> &AverageTracker {
        &self.inner.averages
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.inner.store
    }

    /// Admission entry point for callers; logs the decision.
    pub fn request(&self, address: &str, admit: bool) -> Result<Admission, AdmissionError> {
        let adm = self.inner.queue.request(address, admit)?;
        let waited = adm
            .reference_time
            .map(|t| OffsetDateTime::now_utc() - t)
            .unwrap_or_default();
        match adm.state {
            ScanState::Running => debug!(%address, %waited, "reporting running"),
            ScanState::Queued => {
                debug!(%address, position = adm.position, %waited, "reporting queued")
            }
            ScanState::Idle => debug!(%address, "reporting results"),
        }
        Ok(adm)
    }

    pub fn last_result(&self, address: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.store.get(address)
    }

    pub fn stats(&self) -> ServiceStats {
        let avg = self.inner.averages.snapshot();
        ServiceStats {
            uptime: self.inner.started.elapsed(),
            completed_scans: avg.count,
            average_scan_time: avg.mean,
            queue_len: self.inner.queue.len(),
        }
    }

    /// Drain the queue forever, one scan at a time, until `cancel` fires.
    ///
    /// Cancellation is only observed between scans; a scan that has been
    /// dequeued always runs to completion and is persisted.
    pub async fn run(&self, scanner: PortScanner, cancel: CancellationToken) {
        info!(workers = scanner.config().concurrency, "scanner started");
        loop {
            // Shutdown wins over a non-empty queue
            let (address, started) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.inner.queue.dequeue() => next,
            };
            self.process(&scanner, address, started).await;
        }
        info!("scanner stopped");
    }

    /// Scan one dequeued address, record its duration, persist the report and release it.
    pub async fn process(&self, scanner: &PortScanner, address: String, started: OffsetDateTime) {
        debug!(%address, %started, "dequeued");
        match scanner.scan(&address).await {
            Ok(outcome) => {
                self.inner.averages.record(outcome.elapsed);
                info!(
                    %address,
                    elapsed = ?outcome.elapsed,
                    open = outcome.open_ports.len(),
                    "scan finished"
                );
                let store = self.inner.store.clone();
                let key = address.clone();
                let report = outcome.report.into_bytes();
                match tokio::task::spawn_blocking(move || store.put(&key, &report)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(%address, error = %e, "error saving result"),
                    Err(e) => error!(%address, error = %e, "result save task failed"),
                }
            }
            Err(e) => warn!(%address, error = %e, "scan aborted"),
        }
        self.inner.queue.complete(&address);
    }
}
