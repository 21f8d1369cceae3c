//! ScriptStage - the pipeline stage that runs a user transform.

use crate::config::{ErrorPolicy, ScriptStageConfig};
use crate::evaluator::CallResult;
use crate::pool::{EvaluatorPool, PoolStats};
use async_trait::async_trait;
use rf_error::{ErrorKind, RecordError};
use rf_traits::{DropReason, Stage, StageOutcome};
use rf_types::Record;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Runs one script against each record through a bounded evaluator pool.
///
/// Each `apply` is a fresh pass through acquire, execute, classify and
/// release. Nothing is carried from one record to the next.
pub struct ScriptStage {
    name: String,
    pool: Arc<EvaluatorPool>,
    config: ScriptStageConfig,
}

impl std::fmt::Debug for ScriptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStage")
            .field("name", &self.name)
            .field("script", &self.pool.definition().identity())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptStage {
    pub fn new(
        name: impl Into<String>,
        pool: Arc<EvaluatorPool>,
        config: ScriptStageConfig,
    ) -> Self {
        let name = name.into();
        debug!(
            stage = %name,
            script = %pool.definition().identity(),
            pool_size = pool.size(),
            error_policy = ?config.error_policy,
            "Created ScriptStage"
        );
        Self { name, pool, config }
    }

    pub fn pool(&self) -> &Arc<EvaluatorPool> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.config.error_policy
    }

    /// Applies the error policy to a failure.
    ///
    /// Only script faults are subject to the policy; resource failures
    /// always fail the record.
    fn on_failure(&self, error: RecordError, input: Record) -> StageOutcome {
        let policy = match error.kind {
            ErrorKind::ScriptError | ErrorKind::MalformedOutput => self.config.error_policy,
            _ => ErrorPolicy::Fail,
        };

        match policy {
            ErrorPolicy::Fail => {
                debug!(
                    stage = %self.name,
                    kind = %error.kind,
                    error = %error.message,
                    "Transform failed"
                );
                StageOutcome::Fail(error)
            }
            ErrorPolicy::Drop => {
                debug!(
                    stage = %self.name,
                    kind = %error.kind,
                    error = %error.message,
                    "Transform failed, dropping record"
                );
                StageOutcome::Drop(DropReason::ScriptFailed {
                    kind: error.kind,
                    message: error.message,
                })
            }
            ErrorPolicy::Passthrough => {
                warn!(
                    stage = %self.name,
                    kind = %error.kind,
                    error = %error.message,
                    "Transform failed, passing record through"
                );
                StageOutcome::Emit(input)
            }
        }
    }
}

#[async_trait]
impl Stage for ScriptStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, record: Record) -> StageOutcome {
        let evaluator = match self.pool.acquire(self.config.acquire_timeout).await {
            Ok(evaluator) => evaluator,
            Err(error) => {
                debug!(stage = %self.name, error = %error.message, "No evaluator available");
                return StageOutcome::Fail(error);
            }
        };

        trace!(stage = %self.name, evaluator = ?evaluator.id(), "Executing transform");
        match evaluator.execute(record.clone()).await {
            CallResult::Emit(output) => StageOutcome::Emit(output),
            CallResult::Drop => StageOutcome::Drop(DropReason::ScriptRequested),
            CallResult::Failed(error) => self.on_failure(error, record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ResourceLimits;
    use crate::definition::{ScriptDefinition, ScriptSource};
    use std::time::Duration;

    const SCRIPT: &str = r#"
        fn transform(record) {
            if record.kind == "throw" { throw "boom"; }
            if record.kind == "text" { return "not a record"; }
            if record.kind == "skip" { return (); }
            if record.kind == "spin" { let n = 0; loop { n += 1; } }
            #{ id: record.id, ok: true }
        }
    "#;

    fn stage(policy: ErrorPolicy) -> ScriptStage {
        let limits = ResourceLimits::default()
            .with_timeout(Duration::from_millis(10))
            .with_max_operations(0);
        let definition =
            ScriptDefinition::load(&ScriptSource::Inline(SCRIPT.to_string()), &limits).unwrap();
        let pool = EvaluatorPool::new(Arc::new(definition), limits, 2, Arc::new(SystemClock));
        ScriptStage::new(
            "enrich",
            pool,
            ScriptStageConfig::new().with_error_policy(policy),
        )
    }

    fn record(kind: &str) -> Record {
        Record::from_fields([("id", "r1"), ("kind", kind)])
    }

    #[tokio::test]
    async fn test_emit_and_drop() {
        let stage = stage(ErrorPolicy::Fail);

        match stage.apply(record("plain")).await {
            StageOutcome::Emit(out) => {
                assert_eq!(out.str("id"), Ok("r1"));
                assert!(!out.contains("kind"));
            }
            other => panic!("expected emit, got {other:?}"),
        }
        assert_eq!(
            stage.apply(record("skip")).await,
            StageOutcome::Drop(DropReason::ScriptRequested)
        );
    }

    #[tokio::test]
    async fn test_fail_policy() {
        let stage = stage(ErrorPolicy::Fail);

        for (kind, expected) in [
            ("throw", ErrorKind::ScriptError),
            ("text", ErrorKind::MalformedOutput),
            ("spin", ErrorKind::Timeout),
        ] {
            match stage.apply(record(kind)).await {
                StageOutcome::Fail(error) => assert_eq!(error.kind, expected, "{kind}"),
                other => panic!("{kind}: expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_drop_policy_keeps_error_visible() {
        let stage = stage(ErrorPolicy::Drop);

        match stage.apply(record("throw")).await {
            StageOutcome::Drop(DropReason::ScriptFailed { kind, message }) => {
                assert_eq!(kind, ErrorKind::ScriptError);
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_passthrough_policy() {
        let stage = stage(ErrorPolicy::Passthrough);
        let input = record("text");
        assert_eq!(stage.apply(input.clone()).await, StageOutcome::Emit(input));
    }

    #[tokio::test]
    async fn test_resource_failures_ignore_policy() {
        for policy in [ErrorPolicy::Drop, ErrorPolicy::Passthrough] {
            let stage = stage(policy);
            match stage.apply(record("spin")).await {
                StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::Timeout),
                other => panic!("{policy:?}: expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_next_record() {
        let stage = stage(ErrorPolicy::Fail);

        assert!(matches!(stage.apply(record("throw")).await, StageOutcome::Fail(_)));
        assert!(stage.apply(record("plain")).await.is_emit());
        assert!(matches!(stage.apply(record("spin")).await, StageOutcome::Fail(_)));
        assert!(stage.apply(record("plain")).await.is_emit());

        let stats = stage.pool_stats();
        assert_eq!(stats.destroyed, 2);
        assert!(stats.live <= stats.size);
    }

    #[tokio::test]
    async fn test_exhausted_pool_fails_record() {
        let stage = ScriptStage::new(
            "tight",
            stage(ErrorPolicy::Drop).pool().clone(),
            ScriptStageConfig::new().with_acquire_timeout(Duration::from_millis(5)),
        );
        let _a = stage.pool().acquire(Duration::from_millis(50)).await.unwrap();
        let _b = stage.pool().acquire(Duration::from_millis(50)).await.unwrap();

        match stage.apply(record("plain")).await {
            StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::ResourceExhausted),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
