//! In-memory record source.

use async_trait::async_trait;
use parking_lot::Mutex;
use rf_error::Result;
use rf_traits::RecordSource;
use rf_types::Record;
use std::collections::VecDeque;

/// Serves a fixed list of records, then reports exhaustion.
#[derive(Debug, Default)]
pub struct IterSource {
    records: Mutex<VecDeque<Record>>,
}

impl IterSource {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl RecordSource for IterSource {
    async fn receive(&self, max: usize) -> Result<Option<Vec<Record>>> {
        let mut records = self.records.lock();
        if records.is_empty() {
            return Ok(None);
        }
        let take = max.min(records.len());
        Ok(Some(records.drain(..take).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_then_exhausts() {
        let source = IterSource::new((0..5).map(|n| Record::from_fields([("n", n)])));

        assert_eq!(source.receive(3).await.unwrap().unwrap().len(), 3);
        assert_eq!(source.remaining(), 2);

        let rest = source.receive(3).await.unwrap().unwrap();
        assert_eq!(rest[0].number("n"), Ok(3.0));
        assert!(source.receive(3).await.unwrap().is_none());
    }
}
