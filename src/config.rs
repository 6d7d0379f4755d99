use std::time::Duration;

/// How hard to retry a port whose connect failed with a transient routing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connect attempts per port while failures stay transient. 0 means no bound.
    pub max_attempts: u32,
    /// Sleep between attempts on the same port.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` transient failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures < self.max_attempts
    }
}

/// Per-scan tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Number of worker tasks sweeping the port range.
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Maximum banner bytes read from an open port.
    pub banner_len: usize,
    pub retry: RetryPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            banner_len: 128,
            retry: RetryPolicy::default(),
        }
    }
}

/// What to do with a new admission when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Refuse the newcomer.
    #[default]
    Reject,
    /// Drop the entry at the front of the queue and admit the newcomer.
    EvictOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_len: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_len: 1024,
            overflow: OverflowPolicy::Reject,
        }
    }
}
