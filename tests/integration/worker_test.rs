//! Worker runs over JSON lines, from config file to sink output.

use crate::common::{order_script_path, SharedBuf};
use rf_pipeline::{JsonLinesSink, JsonLinesSource, PipelineConfig, Worker};
use rf_script::SystemClock;
use std::io::Cursor;
use std::sync::Arc;

const INPUT: &str = r#"{"id":"O1","price":20.0,"quantity":12,"customer":{"name":"Alice"}}
{"id":"O2","price":9.99,"quantity":3}

this line is not json
{"id":"O3","price":"free","quantity":1}
{"id":"O4","price":5,"quantity":5,"customer":{"name":"Dana"}}
"#;

fn write_config(dir: &std::path::Path, extra_stage: &str) -> std::path::PathBuf {
    let script = dir.join("order.rhai");
    std::fs::copy(order_script_path(), &script).unwrap();

    let config = format!(
        r#"{{
            "workers": 2,
            "channelBuffer": 2,
            "stages": [
                {{"stageType": "script", "name": "pricing", "scriptSource": "order.rhai", "timeoutMs": 200, "poolSize": 2}}
                {extra_stage}
            ]
        }}"#
    );
    let path = dir.join("pipeline.json");
    std::fs::write(&path, config).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::from_file(write_config(dir.path(), "")).unwrap();
    let pipeline = config.build(Arc::new(SystemClock)).unwrap();
    assert_eq!(pipeline.stage_names(), vec!["pricing"]);

    let out = SharedBuf::default();
    let dead = SharedBuf::default();
    let sink = JsonLinesSink::with_writer(Box::new(out.clone()))
        .with_dead_letter(Box::new(dead.clone()));
    let source = JsonLinesSource::with_reader(Box::new(Cursor::new(INPUT.to_string())));

    let worker = Worker::new(config, Arc::new(pipeline));
    let stats = worker
        .run(Arc::new(source), Arc::new(sink))
        .await
        .unwrap();

    assert_eq!(stats.records_in, 4);
    assert_eq!(stats.records_rejected, 1);
    assert_eq!(stats.records_emitted, 3);
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.failures_by_kind.get("ScriptError"), Some(&1));

    let mut emitted = out.json_lines();
    emitted.sort_by_key(|r| r["orderId"].as_str().unwrap_or_default().to_string());
    assert_eq!(emitted.len(), 3);
    assert_eq!(emitted[0]["orderId"], "O1");
    assert_eq!(emitted[0]["total"], 220.32);
    assert_eq!(emitted[0]["items"], 12);
    assert_eq!(emitted[1]["customerName"], "Unknown");
    assert_eq!(emitted[2]["discountPercent"], 10);

    let letters = dead.json_lines();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0]["sequence"], 2);
    assert_eq!(letters[0]["stageIndex"], 0);
    assert_eq!(letters[0]["kind"], "ScriptError");
    assert_eq!(letters[0]["record"]["id"], "O3");
}

#[tokio::test]
async fn test_second_stage_sees_first_stage_output() {
    let dir = tempfile::tempdir().unwrap();
    let filter = r#",{"stageType": "script", "name": "big-only", "script": "fn transform(r) { if r.total >= 100.0 { r } }"}"#;
    let config = PipelineConfig::from_file(write_config(dir.path(), filter)).unwrap();
    let pipeline = config.build(Arc::new(SystemClock)).unwrap();

    let out = SharedBuf::default();
    let sink = JsonLinesSink::with_writer(Box::new(out.clone()));
    let source = JsonLinesSource::with_reader(Box::new(Cursor::new(INPUT.to_string())));

    let stats = Worker::new(config, Arc::new(pipeline))
        .run(Arc::new(source), Arc::new(sink))
        .await
        .unwrap();

    // only O1 clears 100; O2 and O4 are dropped by the second stage
    assert_eq!(stats.records_emitted, 1);
    assert_eq!(stats.records_dropped, 2);
    assert_eq!(out.json_lines()[0]["orderId"], "O1");
}

#[tokio::test]
async fn test_bad_script_fails_at_build() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.rhai"), "fn transform(r) { r +* }").unwrap();
    std::fs::write(
        dir.path().join("pipeline.json"),
        r#"{"stages": [{"stageType": "script", "scriptSource": "broken.rhai"}]}"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(dir.path().join("pipeline.json")).unwrap();
    let err = config.build(Arc::new(SystemClock)).unwrap_err();
    assert!(err.to_string().contains("compilation"), "{err}");

    let missing = PipelineConfig::from_json_str(
        r#"{"stages": [{"stageType": "script", "scriptSource": "/no/such/script.rhai"}]}"#,
    )
    .unwrap();
    assert!(missing.build(Arc::new(SystemClock)).is_err());
}
