//! Main worker orchestration.

use crate::config::PipelineConfig;
use crate::pipeline::StagePipeline;
use crate::router::{SequencedRecord, WorkRouter};
use crate::stats::{StatsSnapshot, WorkerStats};
use parking_lot::Mutex;
use rf_error::{ErrorKind, RecordError, RfError, Result};
use rf_traits::{RecordOutcome, RecordSink, RecordSource, RunOutcome};
use rf_types::Record;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Clonable handle that stops a running worker's intake.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Stop reading new records. Queued and in-flight records still finish.
    pub fn shutdown(&self) {
        if !self.flag.swap(true, Ordering::Relaxed) {
            info!("Shutdown requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Records that were read but whose outcome has not reached the sink yet.
type Pending = Arc<Mutex<BTreeMap<u64, Record>>>;

/// Tracks consecutive `ResourceExhausted` outcomes across all tasks.
#[derive(Debug)]
struct ExhaustionTracker {
    threshold: u64,
    consecutive: AtomicU64,
    tripped: AtomicBool,
}

impl ExhaustionTracker {
    fn new(threshold: u64) -> Self {
        Self {
            threshold,
            consecutive: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    fn observe(&self, outcome: &RunOutcome) {
        let exhausted = outcome
            .error()
            .is_some_and(|e| e.kind == ErrorKind::ResourceExhausted);

        if !exhausted {
            self.consecutive.store(0, Ordering::Relaxed);
            return;
        }

        let count = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.threshold && !self.tripped.swap(true, Ordering::Relaxed) {
            error!(
                consecutive = count,
                "Evaluator pools exhausted, stopping intake"
            );
        }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

/// Concurrent record processor.
///
/// A receiver loop pulls records from a source, numbers them, and routes
/// them over bounded channels to `workers` tasks. Each task runs records
/// through the shared pipeline one at a time and hands every outcome to the
/// sink.
pub struct Worker {
    config: PipelineConfig,

    pipeline: Arc<StagePipeline>,

    /// Global statistics
    stats: Arc<WorkerStats>,

    shutdown: ShutdownHandle,

    exhaustion: Arc<ExhaustionTracker>,
}

impl Worker {
    pub fn new(config: PipelineConfig, pipeline: Arc<StagePipeline>) -> Self {
        let exhaustion = Arc::new(ExhaustionTracker::new(config.exhaustion_threshold.max(1)));
        Self {
            config,
            pipeline,
            stats: Arc::new(WorkerStats::new()),
            shutdown: ShutdownHandle::default(),
            exhaustion,
        }
    }

    /// Get a reference to the worker statistics.
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until the source is exhausted, shutdown is requested, or the
    /// evaluator pools stay exhausted.
    pub async fn run(
        &self,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<StatsSnapshot> {
        let workers = self.config.workers.max(1);
        info!(
            workers,
            stages = self.pipeline.len(),
            channel_buffer = self.config.channel_buffer,
            "Starting worker"
        );

        let (router, receivers) = WorkRouter::new(workers, self.config.channel_buffer);
        let pending: Pending = Arc::default();

        let mut worker_handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        for (task_id, rx) in receivers.into_iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let sink = sink.clone();
            let stats = self.stats.clone();
            let exhaustion = self.exhaustion.clone();
            let pending = pending.clone();

            worker_handles.push(tokio::spawn(async move {
                worker_task(task_id, rx, pipeline, sink, stats, exhaustion, pending).await;
            }));
        }

        let receiver_result = self.run_receiver(source.as_ref(), &router, &pending).await;

        // Dropping the router closes the channels; tasks drain and exit
        router.shutdown();
        drop(router);

        let shutdown_result = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(worker_handles.iter_mut()),
        )
        .await;

        match shutdown_result {
            Ok(results) => {
                for (i, result) in results.into_iter().enumerate() {
                    if let Err(e) = result {
                        error!(task = i, error = %e, "Worker task panicked");
                    }
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Shutdown timeout exceeded, aborting remaining tasks"
                );
                for handle in &worker_handles {
                    handle.abort();
                }
                // aborted tasks must be gone before their records are failed
                futures::future::join_all(worker_handles).await;
                self.pipeline.close();
            }
        }

        self.fail_unfinished(&pending, sink.as_ref()).await;

        if let Err(e) = sink.flush().await {
            warn!(error = %e, "Failed to flush sink");
        }

        self.stats.record_rejected(source.rejected());
        let mut stats = self.stats.snapshot();
        stats.completed_at = Some(chrono::Utc::now());

        info!(
            records_in = stats.records_in,
            emitted = stats.records_emitted,
            dropped = stats.records_dropped,
            failed = stats.records_failed,
            rejected = stats.records_rejected,
            "Worker completed"
        );
        for (stage, pool) in self.pipeline.pool_stats() {
            debug!(
                stage = %stage,
                created = pool.created,
                destroyed = pool.destroyed,
                peak_in_use = pool.peak_in_use,
                acquire_timeouts = pool.acquire_timeouts,
                "Pool stats"
            );
        }

        receiver_result?;
        if self.exhaustion.tripped() {
            return Err(RfError::PoolExhausted {
                consecutive: self.config.exhaustion_threshold,
            });
        }
        Ok(stats)
    }

    /// Fails every record that was read but never reached the sink, so each
    /// input still ends with exactly one outcome.
    async fn fail_unfinished(&self, pending: &Pending, sink: &dyn RecordSink) {
        let unfinished = std::mem::take(&mut *pending.lock());
        if unfinished.is_empty() {
            return;
        }

        warn!(count = unfinished.len(), "Failing records left unfinished at shutdown");
        for (sequence, input) in unfinished {
            let outcome = RunOutcome::Failed {
                error: RecordError::timeout("cancelled at shutdown before completion"),
                stage_index: 0,
                input,
            };
            self.stats.record_outcome(&outcome);
            if let Err(e) = sink.deliver(RecordOutcome::new(sequence, outcome)).await {
                error!(sequence, error = %e, "Failed to deliver outcome");
            }
        }
    }

    /// Pull batches from the source and route them to the tasks.
    async fn run_receiver(
        &self,
        source: &dyn RecordSource,
        router: &WorkRouter,
        pending: &Pending,
    ) -> Result<()> {
        let mut sequence: u64 = 0;

        loop {
            if self.shutdown.is_shutdown() {
                debug!("Shutdown signaled, stopping receiver");
                break;
            }
            if self.exhaustion.tripped() {
                debug!("Pools exhausted, stopping receiver");
                break;
            }

            let records = match source.receive(self.config.channel_buffer).await {
                Ok(Some(records)) => records,
                Ok(None) => {
                    debug!("Source exhausted, stopping receiver");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive from source");
                    return Err(e);
                }
            };

            if records.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }

            self.stats.record_in(records.len() as u64);
            let batch: Vec<SequencedRecord> = records
                .into_iter()
                .map(|record| {
                    let item = SequencedRecord { sequence, record };
                    sequence += 1;
                    item
                })
                .collect();

            pending
                .lock()
                .extend(batch.iter().map(|item| (item.sequence, item.record.clone())));

            let failed = router.route_batch(batch).await;
            if !failed.is_empty() {
                error!(count = failed.len(), "Failed to route records to workers");
                return Err(RfError::Other(anyhow::anyhow!(
                    "{} records could not be routed; all worker tasks stopped",
                    failed.len()
                )));
            }
        }

        Ok(())
    }
}

/// Task that runs records from one channel through the pipeline.
async fn worker_task(
    task_id: usize,
    mut rx: mpsc::Receiver<SequencedRecord>,
    pipeline: Arc<StagePipeline>,
    sink: Arc<dyn RecordSink>,
    stats: Arc<WorkerStats>,
    exhaustion: Arc<ExhaustionTracker>,
    pending: Pending,
) {
    debug!(task = task_id, "Worker task started");

    while let Some(SequencedRecord { sequence, record }) = rx.recv().await {
        let outcome = pipeline.run(record).await;
        pending.lock().remove(&sequence);
        stats.record_outcome(&outcome);
        exhaustion.observe(&outcome);

        if let Err(e) = sink.deliver(RecordOutcome::new(sequence, outcome)).await {
            error!(task = task_id, sequence, error = %e, "Failed to deliver outcome");
        }
    }

    debug!(task = task_id, "Worker task stopped");
}
