//! Stage trait and per-stage outcomes.

use async_trait::async_trait;
use rf_error::{ErrorKind, RecordError};
use rf_types::Record;
use serde::Serialize;
use std::fmt;

/// Why a stage dropped a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum DropReason {
    /// The transform returned its "no output" signal
    ScriptRequested,

    /// A predicate stage rejected the record
    Filtered,

    /// The transform failed and the stage's error policy turned the failure into a drop
    ScriptFailed { kind: ErrorKind, message: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptRequested => f.write_str("script requested drop"),
            Self::Filtered => f.write_str("filtered"),
            Self::ScriptFailed { kind, message } => write!(f, "script failed ({kind}): {message}"),
        }
    }
}

/// Result of applying one stage to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Continue with this record (it replaces the input downstream)
    Emit(Record),

    /// Stop processing this record without error
    Drop(DropReason),

    /// Stop processing this record with an error
    Fail(RecordError),
}

impl StageOutcome {
    pub fn is_emit(&self) -> bool {
        matches!(self, Self::Emit(_))
    }
}

/// A processing step that transforms, drops, or passes a record.
///
/// Stages are shared across worker tasks, so they must be `Send + Sync` and
/// keep any mutable state behind their own synchronization. `apply` must not
/// panic for any input; every failure is reported as [`StageOutcome::Fail`].
#[async_trait]
pub trait Stage: Send + Sync {
    /// Returns the stage name for logging and dead-letter output.
    fn name(&self) -> &str;

    /// Applies the stage to one record.
    async fn apply(&self, record: Record) -> StageOutcome;
}

type MapFn = dyn Fn(Record) -> Record + Send + Sync;
type PredicateFn = dyn Fn(&Record) -> bool + Send + Sync;

/// A stage that maps every record through a Rust closure.
pub struct MapStage {
    name: String,
    map: Box<MapFn>,
}

impl MapStage {
    pub fn new<F>(name: impl Into<String>, map: F) -> Self
    where
        F: Fn(Record) -> Record + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            map: Box::new(map),
        }
    }
}

#[async_trait]
impl Stage for MapStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, record: Record) -> StageOutcome {
        StageOutcome::Emit((self.map)(record))
    }
}

/// A stage that passes records matching a predicate and drops the rest.
pub struct PredicateStage {
    name: String,
    predicate: Box<PredicateFn>,
}

impl PredicateStage {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }
}

#[async_trait]
impl Stage for PredicateStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, record: Record) -> StageOutcome {
        if (self.predicate)(&record) {
            StageOutcome::Emit(record)
        } else {
            StageOutcome::Drop(DropReason::Filtered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_map_stage() {
        let stage = MapStage::new("tag", |r: Record| r.with_field("tagged", true));
        let outcome = stage.apply(Record::from_fields([("id", "a")])).await;

        match outcome {
            StageOutcome::Emit(record) => {
                assert_eq!(record.get("tagged").and_then(|v| v.as_bool()), Some(true));
                assert_eq!(record.str("id"), Ok("a"));
            }
            other => panic!("expected emit, got {other:?}"),
        }
        assert_eq!(stage.name(), "tag");
    }

    #[tokio::test]
    async fn test_predicate_stage() {
        let stage = PredicateStage::new("big", |r: &Record| r.number("qty").unwrap_or(0.0) >= 10.0);

        assert!(stage.apply(Record::from_fields([("qty", 12)])).await.is_emit());
        assert_eq!(
            stage.apply(Record::from_fields([("qty", 3)])).await,
            StageOutcome::Drop(DropReason::Filtered)
        );
        assert_eq!(
            stage.apply(Record::new()).await,
            StageOutcome::Drop(DropReason::Filtered)
        );
    }

    #[test]
    fn test_drop_reason_display() {
        let reason = DropReason::ScriptFailed {
            kind: ErrorKind::ScriptError,
            message: "boom".to_string(),
        };
        assert_eq!(reason.to_string(), "script failed (ScriptError): boom");
    }
}
