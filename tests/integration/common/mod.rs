//! Common utilities for integration tests.

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rf_script::{
    Clock, EvaluatorPool, FixedClock, ResourceLimits, ScriptDefinition, ScriptSource, ScriptStage,
    ScriptStageConfig,
};
use rf_types::{Record, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Path of the reference order transform.
pub fn order_script_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../scripts/order_transform.rhai")
        .canonicalize()
        .expect("scripts/order_transform.rhai exists")
}

/// The instant every `fixed_clock()` reports.
pub const FIXED_NOW: &str = "2024-03-01T12:30:45.000Z";

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap(),
    ))
}

/// An order record in the shape the reference transform expects.
pub fn order(id: &str, price: f64, quantity: i64, customer: Option<&str>) -> Record {
    let record = Record::from_fields([
        ("id", Value::from(id)),
        ("price", Value::from(price)),
        ("quantity", Value::from(quantity)),
    ]);
    match customer {
        Some(name) => record.with_field("customer", Record::from_fields([("name", name)])),
        None => record,
    }
}

/// Builds a script stage over a fresh pool.
pub fn script_stage(
    source: ScriptSource,
    limits: ResourceLimits,
    pool_size: usize,
    config: ScriptStageConfig,
    clock: Arc<dyn Clock>,
) -> ScriptStage {
    let definition = ScriptDefinition::load(&source, &limits).expect("script loads");
    let pool = EvaluatorPool::new(Arc::new(definition), limits, pool_size, clock);
    ScriptStage::new("test", pool, config)
}

/// A stage running the reference order transform with a fixed clock.
pub fn order_stage() -> ScriptStage {
    script_stage(
        ScriptSource::File(order_script_path()),
        ResourceLimits::default(),
        2,
        ScriptStageConfig::default(),
        fixed_clock(),
    )
}

/// A writer whose contents stay readable after a sink takes ownership of it.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    /// Parses every written line as JSON.
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        String::from_utf8(self.0.lock().clone())
            .expect("utf-8 output")
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid JSON line"))
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
