//! Integration tests for recflow.
//!
//! These drive the reference order transform in `scripts/` and the
//! concurrency guarantees of the script stage end to end. They need no
//! external services.
//!
//! ```bash
//! cargo test -p integration-tests
//! ```

mod common;
mod concurrency_test;
mod isolation_test;
mod order_transform_test;
mod worker_test;
