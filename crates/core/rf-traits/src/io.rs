//! Pipeline outcomes and the source/sink boundary.

use crate::stage::DropReason;
use async_trait::async_trait;
use rf_error::{RecordError, Result};
use rf_types::Record;

/// Terminal outcome of running one record through a pipeline.
///
/// Every input record gets exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All stages passed; this is the final record
    Emitted(Record),

    /// A stage dropped the record
    Dropped {
        reason: DropReason,
        stage_index: usize,
    },

    /// A stage failed; `input` is the record as it entered the pipeline
    Failed {
        error: RecordError,
        stage_index: usize,
        input: Record,
    },
}

impl RunOutcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, Self::Emitted(_))
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns the emitted record, if any.
    pub fn emitted(&self) -> Option<&Record> {
        match self {
            Self::Emitted(record) => Some(record),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    pub fn error(&self) -> Option<&RecordError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A pipeline outcome tagged with the input's sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// Position of the record in the input stream, starting at 0
    pub sequence: u64,

    pub outcome: RunOutcome,
}

impl RecordOutcome {
    pub fn new(sequence: u64, outcome: RunOutcome) -> Self {
        Self { sequence, outcome }
    }
}

/// Source of input records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Receives up to `max` records.
    ///
    /// Returns `Ok(None)` when the source is exhausted.
    /// Returns `Ok(Some(vec![]))` when nothing is available yet but more may come.
    async fn receive(&self, max: usize) -> Result<Option<Vec<Record>>>;

    /// Number of inputs skipped because they could not be decoded.
    fn rejected(&self) -> u64 {
        0
    }
}

/// Destination for per-record outcomes.
///
/// Sinks own what happens to dropped and failed records (retry, dead-letter,
/// logging). Deliveries may arrive out of input order when several workers
/// run; [`RecordOutcome::sequence`] allows reordering.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Delivers one outcome.
    async fn deliver(&self, outcome: RecordOutcome) -> Result<()>;

    /// Flushes buffered output.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
