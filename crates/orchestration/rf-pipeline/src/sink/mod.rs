//! Record sinks.

mod collect;
mod jsonl;

pub use collect::CollectingSink;
pub use jsonl::JsonLinesSink;
