//! Failure isolation and evaluator eviction.

use crate::common::{fixed_clock, script_stage};
use rf_error::ErrorKind;
use rf_pipeline::StagePipeline;
use rf_script::{ResourceLimits, ScriptSource, ScriptStage, ScriptStageConfig};
use rf_traits::{RunOutcome, Stage, StageOutcome};
use rf_types::Record;
use std::time::Duration;

const SCRIPT: &str = r#"
    fn transform(record) {
        switch record.mode {
            "throw" => { throw "bad record " + record.id; },
            "spin" => { let n = 0; loop { n += 1; } },
            "grow" => { let s = "x"; loop { s += s; } },
            "nothing" => (),
            _ => #{ id: record.id, seen: true }
        }
    }
"#;

fn stage(pool_size: usize) -> ScriptStage {
    let limits = ResourceLimits::default()
        .with_timeout(Duration::from_millis(20))
        .with_max_operations(0)
        .with_max_string_size(10_000);
    script_stage(
        ScriptSource::Inline(SCRIPT.to_string()),
        limits,
        pool_size,
        ScriptStageConfig::default(),
        fixed_clock(),
    )
}

fn record(id: &str, mode: &str) -> Record {
    Record::from_fields([("id", id), ("mode", mode)])
}

#[tokio::test]
async fn test_throw_does_not_affect_next_record() {
    let stage = stage(1);

    match stage.apply(record("r1", "throw")).await {
        StageOutcome::Fail(error) => {
            assert_eq!(error.kind, ErrorKind::ScriptError);
            assert!(error.message.contains("bad record r1"), "{}", error.message);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    match stage.apply(record("r2", "plain")).await {
        StageOutcome::Emit(out) => assert_eq!(out.str("id"), Ok("r2")),
        other => panic!("expected emit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_evicts_evaluator() {
    let stage = stage(2);
    stage.pool().warm_up();
    let before = stage.pool_stats();
    assert_eq!(before.live, 2);

    match stage.apply(record("slow", "spin")).await {
        StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }

    let after = stage.pool_stats();
    assert_eq!(after.destroyed, 1);
    assert!(after.live <= after.size);

    // the pool keeps serving within its bound
    for i in 0..5 {
        assert!(stage.apply(record(&format!("ok{i}"), "plain")).await.is_emit());
    }
    let stats = stage.pool_stats();
    assert_eq!(stats.destroyed, 1);
    assert!(stats.live >= 1 && stats.live <= stats.size);
    assert!(stats.peak_in_use <= stats.size);
}

#[tokio::test]
async fn test_memory_ceiling_is_resource_limit() {
    let stage = stage(1);

    match stage.apply(record("big", "grow")).await {
        StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::ResourceLimit),
        other => panic!("expected resource limit, got {other:?}"),
    }
    assert!(stage.apply(record("after", "plain")).await.is_emit());
}

#[tokio::test]
async fn test_pipeline_reports_stage_and_input() {
    let pipeline = StagePipeline::empty().with_script_stage(stage(1));

    let input = record("r9", "throw");
    match pipeline.run(input.clone()).await {
        RunOutcome::Failed {
            error,
            stage_index,
            input: original,
        } => {
            assert_eq!(error.kind, ErrorKind::ScriptError);
            assert_eq!(stage_index, 0);
            assert_eq!(original, input);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert!(pipeline.run(record("r10", "nothing")).await.is_dropped());
    assert!(pipeline.run(record("r11", "plain")).await.is_emitted());
}
