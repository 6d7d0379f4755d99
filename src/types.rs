use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{format_description::well_known, OffsetDateTime};

/// Normalise an address string into the canonical key used by the queue and the store.
///
/// IPv4-mapped IPv6 addresses collapse to plain IPv4 so that `::ffff:10.0.0.1`
/// and `10.0.0.1` share one queue slot and one stored report.
pub fn normalize_address(raw: &str) -> Option<String> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    Some(ip.to_canonical().to_string())
}

/// An address waiting in the queue, with the time it went in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub address: String,
    pub enqueued_at: OffsetDateTime,
}

impl QueueEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Where an address stands right now. Derived from queue membership at query time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Queued,
    Running,
}

/// Answer to an admission request or a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub state: ScanState,
    /// 1-based distance from the front when queued, 0 otherwise.
    pub position: usize,
    pub queue_len: usize,
    /// Scan start time when running, enqueue time when queued.
    pub reference_time: Option<OffsetDateTime>,
}

/// An in-flight scan as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningEntry {
    pub address: String,
    pub started_at: OffsetDateTime,
}

/// Read-only copy of the queue state for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub in_flight: Vec<RunningEntry>,
    pub queued: Vec<QueueEntry>,
}

/// Running scan-duration statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AverageStats {
    pub count: u64,
    pub mean: Duration,
}

/// One open port and whatever it said on connect. An empty banner still means open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub banner: Vec<u8>,
}

/// Everything a finished sweep produced.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub address: String,
    pub open_ports: BTreeMap<u16, Vec<u8>>,
    pub finished_at: OffsetDateTime,
    pub elapsed: Duration,
    pub report: String,
}

/// RFC3339 rendering used on the HTTP surface.
pub fn format_timestamp(t: OffsetDateTime) -> String {
    t.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
