//! Batch writer module
//!
//! Turns streamed rows into columnar bulk loads against the analytics target.
//!
//! # Overview
//!
//! - `BatchWriter` - flushes insert-size chunks and reports memory use
//! - `TargetStore` - the analytics store seam, `DuckDbTarget` implements it
//! - `TargetMutation` - truncate / ranged delete / dedupe run around a load
//! - `rows_to_record_batch` - NULL defaulting and date normalization

mod batch;
mod convert;
mod sql;
mod target;
mod types;

pub use batch::{BatchWriter, DEFAULT_REPORT_INTERVAL};
pub use convert::{mapping_schema, rows_to_record_batch};
pub use sql::{quote_ident, quote_literal, quote_qualified, watermark_literal};
pub use target::{mutation_sql, DuckDbTarget, TargetStore};
pub use types::TargetMutation;
