//! Core traits for recflow.
//!
//! This crate defines the seams every pipeline component plugs into:
//! - [`Stage`] - One processing step, uniform across script and native stages
//! - [`RecordSource`] / [`RecordSink`] - The input and output boundary
//! - [`RunOutcome`] - Exactly one terminal outcome per input record

pub mod io;
pub mod stage;

pub use io::{RecordOutcome, RecordSink, RecordSource, RunOutcome};
pub use stage::{DropReason, MapStage, PredicateStage, Stage, StageOutcome};
