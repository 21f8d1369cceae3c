//! JSON lines record source.

use async_trait::async_trait;
use parking_lot::Mutex;
use rf_error::{RfError, Result};
use rf_traits::RecordSource;
use rf_types::Record;
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Reads one JSON object per line.
///
/// Blank lines are skipped. Lines that are not a JSON object are logged and
/// counted in [`RecordSource::rejected`]; they never stop the run.
pub struct JsonLinesSource {
    reader: Mutex<Box<dyn BufRead + Send>>,

    /// Whether we've reached EOF
    eof_reached: AtomicBool,

    /// Current line number, for diagnostics
    line_number: AtomicU64,

    rejected: AtomicU64,

    /// Records still allowed out, if limited
    remaining: Option<AtomicU64>,
}

impl JsonLinesSource {
    /// A source reading from stdin.
    pub fn stdin() -> Self {
        Self::with_reader(Box::new(BufReader::new(io::stdin())))
    }

    pub fn with_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader: Mutex::new(reader),
            eof_reached: AtomicBool::new(false),
            line_number: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            remaining: None,
        }
    }

    /// Stop after `limit` records have been read.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.remaining = Some(AtomicU64::new(limit));
        self
    }

    pub fn has_more(&self) -> bool {
        !self.eof_reached.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordSource for JsonLinesSource {
    async fn receive(&self, max: usize) -> Result<Option<Vec<Record>>> {
        if self.eof_reached.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let max = match &self.remaining {
            Some(remaining) => {
                let left = remaining.load(Ordering::Relaxed);
                if left == 0 {
                    self.eof_reached.store(true, Ordering::Relaxed);
                    debug!("Input limit reached");
                    return Ok(None);
                }
                max.min(usize::try_from(left).unwrap_or(usize::MAX))
            }
            None => max,
        };

        let mut records = Vec::with_capacity(max);
        let mut reader = self.reader.lock();

        while records.len() < max {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.eof_reached.store(true, Ordering::Relaxed);
                    debug!("Input EOF reached");
                    break;
                }
                Ok(_) => {
                    let line_number = self.line_number.fetch_add(1, Ordering::Relaxed) + 1;
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match Record::from_json_str(line) {
                        Ok(record) => {
                            trace!(line = line_number, "Read record");
                            records.push(record);
                        }
                        Err(e) => {
                            self.rejected.fetch_add(1, Ordering::Relaxed);
                            warn!(line = line_number, error = %e, "Skipping unparseable input line");
                        }
                    }
                }
                Err(e) => {
                    return Err(RfError::Source(format!("failed to read input: {e}")));
                }
            }
        }

        if let Some(remaining) = &self.remaining {
            remaining.fetch_sub(records.len() as u64, Ordering::Relaxed);
        }

        if records.is_empty() && self.eof_reached.load(Ordering::Relaxed) {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }

    fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
