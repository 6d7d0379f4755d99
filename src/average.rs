use std::sync::Mutex;
use std::time::Duration;

use crate::types::AverageStats;

/// Running mean of completed scan durations.
///
/// Has its own lock; it never shares a critical section with the admission queue.
#[derive(Debug, Default)]
pub struct AverageTracker {
    inner: Mutex<AverageStats>,
}

impl AverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one more scan duration into the mean.
    pub fn record(&self, elapsed: Duration) {
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let count = u128::from(stats.count);
        let total = stats.mean.as_nanos() * count + elapsed.as_nanos();
        let mean = total / (count + 1);
        stats.mean = Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX));
        stats.count += 1;
    }

    pub fn snapshot(&self) -> AverageStats {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
