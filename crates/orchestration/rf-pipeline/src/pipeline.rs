//! Ordered stage execution for a single record.

use rf_script::{EvaluatorPool, PoolStats, ScriptStage};
use rf_traits::{RunOutcome, Stage, StageOutcome};
use rf_types::Record;
use std::sync::Arc;
use tracing::trace;

/// An ordered, fixed list of stages.
///
/// Records pass through the stages in construction order. The first drop or
/// failure ends processing for that record; other records are unaffected.
#[derive(Default)]
pub struct StagePipeline {
    stages: Vec<Arc<dyn Stage>>,

    /// Pools owned by script stages, for instrumentation
    pools: Vec<(String, Arc<EvaluatorPool>)>,
}

impl std::fmt::Debug for StagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl StagePipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages,
            pools: Vec::new(),
        }
    }

    /// A pipeline with no stages; it emits every record unchanged.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a script stage and tracks its evaluator pool.
    pub fn with_script_stage(mut self, stage: ScriptStage) -> Self {
        self.pools
            .push((stage.name().to_string(), stage.pool().clone()));
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Current stats of every script stage's pool, by stage name.
    pub fn pool_stats(&self) -> Vec<(String, PoolStats)> {
        self.pools
            .iter()
            .map(|(name, pool)| (name.clone(), pool.stats()))
            .collect()
    }

    /// Closes every evaluator pool; later acquires fail immediately.
    pub fn close(&self) {
        for (_, pool) in &self.pools {
            pool.close();
        }
    }

    /// Runs one record through every stage.
    pub async fn run(&self, input: Record) -> RunOutcome {
        let mut current = input.clone();

        for (stage_index, stage) in self.stages.iter().enumerate() {
            match stage.apply(current).await {
                StageOutcome::Emit(next) => current = next,
                StageOutcome::Drop(reason) => {
                    trace!(stage = stage.name(), stage_index, %reason, "Record dropped");
                    return RunOutcome::Dropped {
                        reason,
                        stage_index,
                    };
                }
                StageOutcome::Fail(error) => {
                    trace!(stage = stage.name(), stage_index, %error, "Record failed");
                    return RunOutcome::Failed {
                        error,
                        stage_index,
                        input,
                    };
                }
            }
        }

        RunOutcome::Emitted(current)
    }
}
