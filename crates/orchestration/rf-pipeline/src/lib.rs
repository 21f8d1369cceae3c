//! Pipeline assembly and concurrent execution.
//!
//! [`PipelineConfig`] describes the stages and builds a [`StagePipeline`];
//! [`Worker`] drives records from a [`RecordSource`](rf_traits::RecordSource)
//! through it with a fixed number of tasks and delivers every outcome to a
//! [`RecordSink`](rf_traits::RecordSink).

mod config;
mod pipeline;
mod router;
pub mod sink;
pub mod source;
mod stats;
mod worker;

pub use config::{PipelineConfig, ScriptStageDescriptor, StageDescriptor, DEFAULT_POOL_SIZE};
pub use pipeline::StagePipeline;
pub use router::{SequencedRecord, WorkRouter};
pub use sink::{CollectingSink, JsonLinesSink};
pub use source::{IterSource, JsonLinesSource};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker::{ShutdownHandle, Worker};
