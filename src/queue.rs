use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::{OverflowPolicy, QueueConfig};
use crate::error::AdmissionError;
use crate::types::{Admission, QueueEntry, QueueSnapshot, RunningEntry, ScanState};

/// FIFO scan queue plus the set of addresses currently being scanned.
///
/// One mutex guards both structures so "is it running, is it queued, add it"
/// is a single decision. An address is never in both at once and never twice
/// in the queue.
#[derive(Debug)]
pub struct AdmissionQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    config: QueueConfig,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<QueueEntry>,
    in_flight: HashMap<String, OffsetDateTime>,
}

impl QueueState {
    fn lookup(&self, address: &str) -> Option<Admission> {
        if let Some(started) = self.in_flight.get(address) {
            return Some(Admission {
                state: ScanState::Running,
                position: 0,
                queue_len: self.queue.len(),
                reference_time: Some(*started),
            });
        }
        self.queue
            .iter()
            .position(|e| e.address == address)
            .map(|idx| Admission {
                state: ScanState::Queued,
                position: idx + 1,
                queue_len: self.queue.len(),
                reference_time: Some(self.queue[idx].enqueued_at),
            })
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl AdmissionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            config,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report where `address` stands and, if it is nowhere and `admit` is set, queue it.
    ///
    /// Addresses already running or queued are reported as such and never
    /// re-enqueued. The only failure is a full queue under
    /// [`OverflowPolicy::Reject`], and only for a new admission.
    pub fn request(&self, address: &str, admit: bool) -> Result<Admission, AdmissionError> {
        let mut st = self.state();
        if let Some(found) = st.lookup(address) {
            return Ok(found);
        }
        if !admit {
            return Ok(Admission {
                state: ScanState::Idle,
                position: 0,
                queue_len: st.queue.len(),
                reference_time: None,
            });
        }

        if st.queue.len() >= self.config.max_len {
            match self.config.overflow {
                OverflowPolicy::EvictOldest if self.config.max_len > 0 => {
                    if let Some(evicted) = st.queue.pop_front() {
                        warn!(address = %evicted.address, "queue full, evicted oldest entry");
                    }
                }
                _ => {
                    debug!(%address, limit = self.config.max_len, "queue full, admission refused");
                    return Err(AdmissionError::QueueFull {
                        limit: self.config.max_len,
                    });
                }
            }
        }

        let entry = QueueEntry::new(address);
        let enqueued_at = entry.enqueued_at;
        st.queue.push_back(entry);
        let len = st.queue.len();
        drop(st);

        self.wake.notify_one();
        debug!(%address, position = len, "queued");
        Ok(Admission {
            state: ScanState::Queued,
            position: len,
            queue_len: len,
            reference_time: Some(enqueued_at),
        })
    }

    /// Status of `address` without admitting it.
    pub fn status(&self, address: &str) -> Admission {
        let st = self.state();
        st.lookup(address).unwrap_or(Admission {
            state: ScanState::Idle,
            position: 0,
            queue_len: st.queue.len(),
            reference_time: None,
        })
    }

    /// Pop the front entry and mark it in flight, if there is one.
    pub fn try_dequeue(&self) -> Option<(String, OffsetDateTime)> {
        let mut st = self.state();
        let entry = st.queue.pop_front()?;
        let started = OffsetDateTime::now_utc();
        st.in_flight.insert(entry.address.clone(), started);
        Some((entry.address, started))
    }

    /// Wait until the queue is non-empty, then pop the front entry and mark it in flight.
    ///
    /// Cancel-safe: nothing is popped unless the future completes.
    pub async fn dequeue(&self) -> (String, OffsetDateTime) {
        loop {
            if let Some(next) = self.try_dequeue() {
                return next;
            }
            debug!("scanner sleeping");
            self.wake.notified().await;
            debug!("scanner woke up");
        }
    }

    /// Clear the in-flight mark left by [`dequeue`](Self::dequeue). Returns whether it was set.
    pub fn complete(&self, address: &str) -> bool {
        self.state().in_flight.remove(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let st = self.state();
        let mut in_flight: Vec<RunningEntry> = st
            .in_flight
            .iter()
            .map(|(address, started_at)| RunningEntry {
                address: address.clone(),
                started_at: *started_at,
            })
            .collect();
        in_flight.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        QueueSnapshot {
            in_flight,
            queued: st.queue.iter().cloned().collect(),
        }
    }
}
