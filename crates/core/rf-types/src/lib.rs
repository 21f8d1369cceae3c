//! Core types for recflow.
//!
//! This crate provides the data flowing through every pipeline stage:
//! - [`Value`] - Dynamically typed field value (number, string, bool, null, record, sequence)
//! - [`Record`] - Immutable, cheaply clonable mapping from field name to [`Value`]
//! - [`round_currency`] / [`round_to`] - The rounding rule derived monetary fields rely on

pub mod numeric;
pub mod record;
pub mod value;

pub use numeric::{round_currency, round_to};
pub use record::Record;
pub use value::{Value, ValueError};
