//! JSON lines sink with an optional dead-letter channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use rf_error::{RfError, Result};
use rf_traits::{DropReason, RecordOutcome, RecordSink, RunOutcome};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::io::{self, BufWriter, Write};
use tracing::{trace, warn};

type Writer = Mutex<Box<dyn Write + Send>>;

/// One dead-letter line.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetter<'a> {
    sequence: u64,
    stage_index: usize,
    kind: &'a str,
    message: &'a str,

    /// The record as it entered the pipeline; null for dropped records
    record: JsonValue,
}

/// Writes emitted records as JSON lines.
///
/// Failed records, and records dropped because their transform failed, go to
/// the dead-letter writer when one is configured. Records a script or
/// predicate dropped on purpose are only logged.
pub struct JsonLinesSink {
    out: Writer,
    dead_letter: Option<Writer>,
}

impl JsonLinesSink {
    /// A sink writing to stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(BufWriter::new(io::stdout())))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(writer),
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.dead_letter = Some(Mutex::new(writer));
        self
    }

    fn write_line(writer: &Writer, line: &str) -> io::Result<()> {
        let mut writer = writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn dead_letter(&self, entry: DeadLetter<'_>) -> Result<()> {
        let Some(writer) = &self.dead_letter else {
            return Ok(());
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| RfError::Sink(format!("failed to encode dead letter: {e}")))?;
        Self::write_line(writer, &line)
            .map_err(|e| RfError::Sink(format!("failed to write dead letter: {e}")))
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn deliver(&self, outcome: RecordOutcome) -> Result<()> {
        let sequence = outcome.sequence;

        match outcome.outcome {
            RunOutcome::Emitted(record) => {
                let line = record
                    .to_json_string()
                    .map_err(|e| RfError::Sink(format!("failed to encode record {sequence}: {e}")))?;
                Self::write_line(&self.out, &line)
                    .map_err(|e| RfError::Sink(format!("failed to write record {sequence}: {e}")))
            }
            RunOutcome::Dropped {
                reason: DropReason::ScriptFailed { kind, message },
                stage_index,
            } => {
                warn!(sequence, stage_index, %kind, %message, "Record dropped after transform failure");
                self.dead_letter(DeadLetter {
                    sequence,
                    stage_index,
                    kind: kind.as_str(),
                    message: &message,
                    record: JsonValue::Null,
                })
            }
            RunOutcome::Dropped {
                reason,
                stage_index,
            } => {
                trace!(sequence, stage_index, %reason, "Record dropped");
                Ok(())
            }
            RunOutcome::Failed {
                error,
                stage_index,
                input,
            } => {
                warn!(
                    sequence,
                    stage_index,
                    kind = %error.kind,
                    error = %error.message,
                    "Record failed"
                );
                let record = serde_json::to_value(&input)
                    .map_err(|e| RfError::Sink(format!("failed to encode record {sequence}: {e}")))?;
                self.dead_letter(DeadLetter {
                    sequence,
                    stage_index,
                    kind: error.kind.as_str(),
                    message: &error.message,
                    record,
                })
            }
        }
    }

    async fn flush(&self) -> Result<()> {
        self.out
            .lock()
            .flush()
            .map_err(|e| RfError::Sink(format!("failed to flush output: {e}")))?;
        if let Some(writer) = &self.dead_letter {
            writer
                .lock()
                .flush()
                .map_err(|e| RfError::Sink(format!("failed to flush dead letters: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_error::{ErrorKind, RecordError};
    use rf_types::Record;
    use std::sync::Arc;

    /// A writer whose contents stay readable after the sink takes it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<JsonValue> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_writes_emitted_records() {
        let out = SharedBuf::default();
        let sink = JsonLinesSink::with_writer(Box::new(out.clone()));

        let record = Record::from_fields([("id", "O1")]).with_field("total", 220.32);
        sink.deliver(RecordOutcome::new(0, RunOutcome::Emitted(record)))
            .await
            .unwrap();
        sink.flush().await.unwrap();

        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["id"], "O1");
        assert_eq!(lines[0]["total"], 220.32);
    }

    #[tokio::test]
    async fn test_dead_letters_failures() {
        let out = SharedBuf::default();
        let dlq = SharedBuf::default();
        let sink =
            JsonLinesSink::with_writer(Box::new(out.clone())).with_dead_letter(Box::new(dlq.clone()));

        let input = Record::from_fields([("id", "O9"), ("quantity", "lots")]);
        sink.deliver(RecordOutcome::new(
            3,
            RunOutcome::Failed {
                error: RecordError::script("quantity is not a number"),
                stage_index: 1,
                input,
            },
        ))
        .await
        .unwrap();
        sink.deliver(RecordOutcome::new(
            4,
            RunOutcome::Dropped {
                reason: DropReason::ScriptRequested,
                stage_index: 0,
            },
        ))
        .await
        .unwrap();
        sink.deliver(RecordOutcome::new(
            5,
            RunOutcome::Dropped {
                reason: DropReason::ScriptFailed {
                    kind: ErrorKind::MalformedOutput,
                    message: "string".to_string(),
                },
                stage_index: 0,
            },
        ))
        .await
        .unwrap();

        assert!(out.lines().is_empty());

        let letters = dlq.lines();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0]["sequence"], 3);
        assert_eq!(letters[0]["stageIndex"], 1);
        assert_eq!(letters[0]["kind"], "ScriptError");
        assert_eq!(letters[0]["record"]["id"], "O9");
        assert_eq!(letters[1]["kind"], "MalformedOutput");
        assert!(letters[1]["record"].is_null());
    }

    #[tokio::test]
    async fn test_failures_without_dead_letter_are_only_logged() {
        let out = SharedBuf::default();
        let sink = JsonLinesSink::with_writer(Box::new(out.clone()));

        sink.deliver(RecordOutcome::new(
            0,
            RunOutcome::Failed {
                error: RecordError::timeout("deadline exceeded"),
                stage_index: 0,
                input: Record::new(),
            },
        ))
        .await
        .unwrap();

        assert!(out.lines().is_empty());
    }
}
