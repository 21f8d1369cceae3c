//! Rhai script stage for recflow pipelines.
//!
//! This crate runs user-supplied transform scripts safely inside a long-lived
//! concurrent pipeline:
//!
//! - [`ScriptDefinition`]: a script loaded, compiled and checked once at startup
//! - [`EvaluatorPool`]: a fixed number of isolated evaluators handed out per record
//! - [`ScriptStage`]: acquires an evaluator, runs `transform(record)` under a
//!   deadline and resource ceilings, and classifies the outcome
//!
//! # Script contract
//!
//! ```text
//! fn transform(record) {
//!     if record.quantity == 0 {
//!         return ();            // drop the record
//!     }
//!     record.total = round_currency(record.price * record.quantity);
//!     record                    // emit (replaces the input downstream)
//! }
//! ```
//!
//! Throwing fails the record with `ScriptError`; returning anything other
//! than a map or `()` fails it with `MalformedOutput`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rf_script::{EvaluatorPool, ResourceLimits, ScriptDefinition, ScriptSource,
//!                 ScriptStage, ScriptStageConfig, SystemClock};
//!
//! let limits = ResourceLimits::default();
//! let definition = ScriptDefinition::load(&ScriptSource::File("order.rhai".into()), &limits)?;
//! let pool = EvaluatorPool::new(Arc::new(definition), limits, 4, Arc::new(SystemClock));
//! pool.warm_up();
//! let stage = ScriptStage::new("orders", pool, ScriptStageConfig::default());
//! let outcome = stage.apply(record).await;
//! ```

mod builtin;
mod clock;
mod config;
mod conversion;
mod definition;
mod evaluator;
mod pool;
mod stage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{duration_ms, ErrorPolicy, ResourceLimits, ScriptStageConfig};
pub use conversion::{dynamic_to_record, record_to_dynamic};
pub use definition::{ScriptDefinition, ScriptSource, MAX_SCRIPT_LENGTH, TRANSFORM_FN};
pub use evaluator::{CallResult, Evaluator};
pub use pool::{EvaluatorPool, PoolStats, PooledEvaluator};
pub use stage::ScriptStage;
