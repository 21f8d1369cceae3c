//! Record sources.

mod iter;
mod jsonl;

pub use iter::IterSource;
pub use jsonl::JsonLinesSource;
