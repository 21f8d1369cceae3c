//! Bounded pool of evaluators.

use crate::clock::Clock;
use crate::config::ResourceLimits;
use crate::definition::ScriptDefinition;
use crate::evaluator::{CallResult, Evaluator};
use parking_lot::Mutex;
use rf_error::RecordError;
use rf_types::Record;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

/// Point-in-time view of a pool.
///
/// `live` and `peak_in_use` never exceed `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Configured maximum number of evaluators
    pub size: usize,

    /// Evaluators currently in existence (idle + checked out)
    pub live: usize,

    pub idle: usize,

    pub in_use: usize,

    /// Highest `in_use` ever observed
    pub peak_in_use: usize,

    /// Evaluators created since the pool was built
    pub created: u64,

    /// Evaluators destroyed after a fault
    pub destroyed: u64,

    /// Acquire calls that gave up waiting
    pub acquire_timeouts: u64,
}

/// A fixed-size pool of evaluators for one script.
///
/// A semaphore with `size` permits gates checkout, so at most `size`
/// evaluators exist at any time. Faulted evaluators are destroyed on release
/// and replaced lazily by the next acquire.
pub struct EvaluatorPool {
    definition: Arc<ScriptDefinition>,
    limits: ResourceLimits,
    clock: Arc<dyn Clock>,
    size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Evaluator>>,
    next_id: AtomicU64,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl std::fmt::Debug for EvaluatorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorPool")
            .field("script", &self.definition.identity())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EvaluatorPool {
    /// Creates an empty pool. A `size` of zero is treated as one.
    pub fn new(
        definition: Arc<ScriptDefinition>,
        limits: ResourceLimits,
        size: usize,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let size = size.max(1);
        Arc::new(Self {
            definition,
            limits,
            clock,
            size,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            next_id: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
            peak_in_use: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn definition(&self) -> &Arc<ScriptDefinition> {
        &self.definition
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Pre-creates evaluators up to the pool size.
    ///
    /// Only runs while nothing is checked out; returns how many were created.
    pub fn warm_up(&self) -> usize {
        let Ok(_all) = self.permits.try_acquire_many(self.size as u32) else {
            debug!(script = %self.definition.identity(), "Pool busy, skipping warm-up");
            return 0;
        };

        let mut idle = self.idle.lock();
        let missing = self.size.saturating_sub(idle.len());
        for _ in 0..missing {
            idle.push(self.create());
        }
        debug!(
            script = %self.definition.identity(),
            created = missing,
            size = self.size,
            "Warmed up evaluator pool"
        );
        missing
    }

    /// Checks out an evaluator, waiting at most `timeout` for one to free up.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledEvaluator, RecordError> {
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(RecordError::resource_exhausted("evaluator pool is closed"));
            }
            Err(_) => {
                self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                trace!(timeout_ms = timeout.as_millis() as u64, "Evaluator acquire timed out");
                return Err(RecordError::resource_exhausted(format!(
                    "no evaluator available within {}ms (pool size {})",
                    timeout.as_millis(),
                    self.size
                )));
            }
        };

        let reused = self.idle.lock().pop();
        let evaluator = match reused {
            Some(evaluator) => evaluator,
            None => self.create(),
        };

        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::SeqCst);

        Ok(PooledEvaluator {
            evaluator: Some(evaluator),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Stops handing out evaluators; pending and future acquires fail.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn stats(&self) -> PoolStats {
        let created = self.created.load(Ordering::SeqCst);
        let destroyed = self.destroyed.load(Ordering::SeqCst);
        PoolStats {
            size: self.size,
            live: created.saturating_sub(destroyed) as usize,
            idle: self.idle.lock().len(),
            in_use: self.in_use.load(Ordering::SeqCst),
            peak_in_use: self.peak_in_use.load(Ordering::SeqCst),
            created,
            destroyed,
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
        }
    }

    fn create(&self) -> Evaluator {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::SeqCst);
        trace!(evaluator = id, script = %self.definition.identity(), "Creating evaluator");
        Evaluator::new(id, self.definition.clone(), &self.limits, self.clock.clone())
    }

    fn give_back(&self, evaluator: Evaluator, healthy: bool) {
        if healthy {
            self.idle.lock().push(evaluator);
        } else {
            debug!(
                evaluator = evaluator.id(),
                calls = evaluator.calls(),
                "Destroying faulted evaluator"
            );
            drop(evaluator);
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An evaluator checked out of a pool.
///
/// Holds its pool slot until released. Dropping it without [`release`]
/// counts as an unhealthy release.
///
/// [`release`]: PooledEvaluator::release
pub struct PooledEvaluator {
    evaluator: Option<Evaluator>,
    pool: Arc<EvaluatorPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEvaluator")
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

impl PooledEvaluator {
    pub fn id(&self) -> Option<u64> {
        self.evaluator.as_ref().map(Evaluator::id)
    }

    /// Runs the transform on the current thread.
    pub fn call(&mut self, record: &Record) -> CallResult {
        match self.evaluator.as_mut() {
            Some(evaluator) => evaluator.call(record),
            None => CallResult::Failed(RecordError::script("evaluator already released")),
        }
    }

    /// Runs the transform on a blocking thread under the pool's hard deadline,
    /// then releases the evaluator according to the result.
    ///
    /// If the hard deadline passes, the call is abandoned and reported as a
    /// timeout. The abandoned evaluator keeps its slot until its thread
    /// returns, and is then destroyed.
    pub async fn execute(self, record: Record) -> CallResult {
        let hard_deadline = self.pool.limits.hard_deadline();
        let evaluator_id = self.id();

        let mut guard = self;
        let handle = tokio::task::spawn_blocking(move || {
            let result = guard.call(&record);
            (guard, result)
        });

        match tokio::time::timeout(hard_deadline, handle).await {
            Ok(Ok((guard, result))) => {
                guard.release(result.evaluator_healthy());
                result
            }
            Ok(Err(join_error)) => {
                warn!(evaluator = ?evaluator_id, error = %join_error, "Evaluator thread panicked");
                CallResult::Failed(RecordError::script(format!(
                    "evaluator panicked: {join_error}"
                )))
            }
            Err(_) => {
                warn!(
                    evaluator = ?evaluator_id,
                    deadline_ms = hard_deadline.as_millis() as u64,
                    "Evaluator did not stop at its deadline, abandoning it"
                );
                CallResult::Failed(RecordError::timeout(format!(
                    "execution exceeded {}ms and was abandoned",
                    hard_deadline.as_millis()
                )))
            }
        }
    }

    /// Returns the evaluator to the pool, or destroys it when unhealthy.
    pub fn release(mut self, healthy: bool) {
        if let Some(evaluator) = self.evaluator.take() {
            self.pool.give_back(evaluator, healthy);
        }
    }
}

impl Drop for PooledEvaluator {
    fn drop(&mut self) {
        if let Some(evaluator) = self.evaluator.take() {
            self.pool.give_back(evaluator, false);
        }
    }
}
