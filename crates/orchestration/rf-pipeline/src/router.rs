//! Work router for distributing records to worker tasks.

use rf_types::Record;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A record tagged with its position in the input stream.
#[derive(Debug, Clone)]
pub struct SequencedRecord {
    pub sequence: u64,
    pub record: Record,
}

/// Distributes records round-robin over a fixed set of worker channels.
///
/// Channels are bounded, so a busy worker applies backpressure to intake.
pub struct WorkRouter {
    /// Senders for each worker task
    senders: Vec<mpsc::Sender<SequencedRecord>>,

    /// Round-robin counter for distribution
    next_worker: AtomicUsize,

    shutdown: AtomicBool,
}

impl WorkRouter {
    /// Create a router for `num_workers` workers with `buffer_size` slots each.
    pub fn new(
        num_workers: usize,
        buffer_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<SequencedRecord>>) {
        let mut senders = Vec::with_capacity(num_workers);
        let mut receivers = Vec::with_capacity(num_workers);

        for _ in 0..num_workers.max(1) {
            let (tx, rx) = mpsc::channel(buffer_size.max(1));
            senders.push(tx);
            receivers.push(rx);
        }

        let router = Self {
            senders,
            next_worker: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        };

        (router, receivers)
    }

    /// Route one record to the next worker.
    ///
    /// Returns the record back if the router is shut down or the worker is gone.
    pub async fn route(&self, item: SequencedRecord) -> Result<(), SequencedRecord> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(item);
        }

        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        trace!(worker = worker_idx, sequence = item.sequence, "Routing record");

        self.senders[worker_idx].send(item).await.map_err(|e| e.0)
    }

    /// Route a batch of records; returns those that could not be routed.
    pub async fn route_batch(&self, items: Vec<SequencedRecord>) -> Vec<SequencedRecord> {
        let mut failed = Vec::new();

        for item in items {
            if let Err(item) = self.route(item).await {
                failed.push(item);
            }
        }

        if !failed.is_empty() {
            debug!("{} records could not be routed", failed.len());
        }

        failed
    }

    /// Stop accepting records. Workers drain what is already queued.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        debug!("Work router shutdown signaled");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }
}
