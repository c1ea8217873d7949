//! Schema contracts for stage outputs.
//!
//! This module provides:
//! - Contract declarations (text, nested record, choice and list fields)
//! - A thread-safe contract registry with JSON descriptors
//! - Recursive validation with field paths
//! - Coercion of raw backend text into JSON
//! - Typed decoding of validated records

mod coerce;
mod registry;
mod schema;
mod typed_output;
mod validate;

pub use coerce::coerce_raw_output;
pub use registry::ContractRegistry;
pub use schema::{FieldKind, SchemaContract, SchemaField};
pub use typed_output::{decode_record, decode_value, text_field, ContractRecord};
pub use validate::{validate, ValidatedRecord};
