//! Concurrency bound of the evaluator pool.

use crate::common::{fixed_clock, order, order_script_path, script_stage};
use futures::future::join_all;
use rf_error::ErrorKind;
use rf_script::{ResourceLimits, ScriptSource, ScriptStageConfig};
use rf_traits::{Stage, StageOutcome};
use rf_types::Record;
use std::sync::Arc;
use std::time::Duration;

/// Burns a few milliseconds so calls overlap.
const BUSY: &str = r#"
    fn transform(record) {
        let n = 0;
        while n < 20000 { n += 1; }
        #{ id: record.id, spins: n }
    }
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_never_exceeds_pool_size() {
    let limits = ResourceLimits::default()
        .with_timeout(Duration::from_secs(2))
        .with_max_operations(0);
    let stage = Arc::new(script_stage(
        ScriptSource::Inline(BUSY.to_string()),
        limits,
        3,
        ScriptStageConfig::new().with_acquire_timeout(Duration::from_secs(30)),
        fixed_clock(),
    ));

    let calls = (0..40).map(|i| {
        let stage = stage.clone();
        tokio::spawn(async move {
            stage
                .apply(Record::from_fields([("id", i as f64)]))
                .await
        })
    });
    let outcomes = join_all(calls).await;

    for outcome in outcomes {
        assert!(outcome.unwrap().is_emit());
    }

    let stats = stage.pool_stats();
    assert_eq!(stats.size, 3);
    assert!(stats.peak_in_use <= 3, "peak {}", stats.peak_in_use);
    assert!(stats.created <= 3, "created {}", stats.created);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.destroyed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_pool_reports_resource_exhausted() {
    let stage = Arc::new(script_stage(
        ScriptSource::File(order_script_path()),
        ResourceLimits::default(),
        1,
        ScriptStageConfig::new().with_acquire_timeout(Duration::from_millis(10)),
        fixed_clock(),
    ));

    // hold the only evaluator
    let held = stage
        .pool()
        .acquire(Duration::from_millis(100))
        .await
        .unwrap();

    match stage.apply(order("X", 1.0, 1, None)).await {
        StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::ResourceExhausted),
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(stage.pool_stats().acquire_timeouts, 1);

    held.release(true);
    assert!(stage.apply(order("X", 1.0, 1, None)).await.is_emit());
}
