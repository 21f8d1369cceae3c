//! In-memory sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use rf_error::{RecordError, Result};
use rf_traits::{RecordOutcome, RecordSink};
use rf_types::Record;

/// Keeps every delivered outcome in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    outcomes: Mutex<Vec<RecordOutcome>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }

    /// All outcomes, ordered by input sequence.
    pub fn outcomes(&self) -> Vec<RecordOutcome> {
        let mut outcomes = self.outcomes.lock().clone();
        outcomes.sort_by_key(|o| o.sequence);
        outcomes
    }

    /// Emitted records, ordered by input sequence.
    pub fn emitted(&self) -> Vec<Record> {
        self.outcomes()
            .into_iter()
            .filter_map(|o| o.outcome.emitted().cloned())
            .collect()
    }

    /// Failures with their sequence numbers.
    pub fn failures(&self) -> Vec<(u64, RecordError)> {
        self.outcomes()
            .into_iter()
            .filter_map(|o| o.outcome.error().cloned().map(|e| (o.sequence, e)))
            .collect()
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn deliver(&self, outcome: RecordOutcome) -> Result<()> {
        self.outcomes.lock().push(outcome);
        Ok(())
    }
}
