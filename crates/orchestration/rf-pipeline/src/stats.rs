//! Statistics for worker runs.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rf_error::ErrorKind;
use rf_traits::RunOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected during a worker run.
///
/// Counters are atomics so every worker task can update them without locking.
#[derive(Debug, Default)]
pub struct WorkerStats {
    started_at: Option<DateTime<Utc>>,

    /// When the first outcome was recorded
    first_outcome_at: Mutex<Option<DateTime<Utc>>>,

    /// When the last outcome was recorded
    last_outcome_at: Mutex<Option<DateTime<Utc>>>,

    records_in: AtomicU64,
    records_emitted: AtomicU64,
    records_dropped: AtomicU64,
    records_failed: AtomicU64,

    /// Lines the source could not decode
    records_rejected: AtomicU64,

    /// Failures by kind, indexed like `ErrorKind::ALL`
    failures_by_kind: [AtomicU64; 5],
}

impl WorkerStats {
    /// Create a new stats tracker with the current time as start time.
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record a record accepted from the source.
    pub fn record_in(&self, count: u64) {
        self.records_in.fetch_add(count, Ordering::Relaxed);
    }

    /// Record records the source rejected.
    pub fn record_rejected(&self, count: u64) {
        self.records_rejected.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one terminal outcome.
    pub fn record_outcome(&self, outcome: &RunOutcome) {
        let now = Utc::now();
        {
            let mut first = self.first_outcome_at.lock();
            if first.is_none() {
                *first = Some(now);
            }
        }
        *self.last_outcome_at.lock() = Some(now);

        match outcome {
            RunOutcome::Emitted(_) => {
                self.records_emitted.fetch_add(1, Ordering::Relaxed);
            }
            RunOutcome::Dropped { .. } => {
                self.records_dropped.fetch_add(1, Ordering::Relaxed);
            }
            RunOutcome::Failed { error, .. } => {
                self.records_failed.fetch_add(1, Ordering::Relaxed);
                self.failures_by_kind[kind_index(error.kind)].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn records_in(&self) -> u64 {
        self.records_in.load(Ordering::Relaxed)
    }

    pub fn records_emitted(&self) -> u64 {
        self.records_emitted.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn records_failed(&self) -> u64 {
        self.records_failed.load(Ordering::Relaxed)
    }

    pub fn records_rejected(&self) -> u64 {
        self.records_rejected.load(Ordering::Relaxed)
    }

    /// Number of failures of one kind.
    pub fn failures(&self, kind: ErrorKind) -> u64 {
        self.failures_by_kind[kind_index(kind)].load(Ordering::Relaxed)
    }

    /// Create a snapshot of the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        let failures_by_kind = ErrorKind::ALL
            .iter()
            .filter_map(|kind| {
                let count = self.failures(*kind);
                (count > 0).then(|| (kind.as_str().to_string(), count))
            })
            .collect();

        StatsSnapshot {
            started_at: self.started_at,
            completed_at: None,
            first_outcome_at: *self.first_outcome_at.lock(),
            last_outcome_at: *self.last_outcome_at.lock(),
            records_in: self.records_in(),
            records_emitted: self.records_emitted(),
            records_dropped: self.records_dropped(),
            records_failed: self.records_failed(),
            records_rejected: self.records_rejected(),
            failures_by_kind,
        }
    }
}

fn kind_index(kind: ErrorKind) -> usize {
    ErrorKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default()
}

/// A serializable snapshot of worker statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub first_outcome_at: Option<DateTime<Utc>>,
    pub last_outcome_at: Option<DateTime<Utc>>,
    pub records_in: u64,
    pub records_emitted: u64,
    pub records_dropped: u64,
    pub records_failed: u64,
    pub records_rejected: u64,

    /// Non-zero failure counts by kind name
    pub failures_by_kind: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Total duration of the run, including startup and drain.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Time between the first and the last outcome.
    pub fn active_duration(&self) -> Option<Duration> {
        match (self.first_outcome_at, self.last_outcome_at) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }

    /// Records per second over the active duration.
    pub fn records_per_second(&self) -> Option<f64> {
        self.active_duration().map(|d| {
            let secs = d.num_milliseconds() as f64 / 1000.0;
            if secs > 0.0 {
                self.records_out() as f64 / secs
            } else {
                0.0
            }
        })
    }

    /// Records that reached a terminal outcome.
    pub fn records_out(&self) -> u64 {
        self.records_emitted + self.records_dropped + self.records_failed
    }

    pub fn has_failures(&self) -> bool {
        self.records_failed > 0
    }
}
