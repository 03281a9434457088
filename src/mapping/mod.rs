//! Type mapper module
//!
//! Infers the source to target column mapping from the first batch that
//! yields a row, and normalizes date-like values.
//!
//! # Inference rules
//!
//! | First-row value        | Target type |
//! |------------------------|-------------|
//! | integer number         | `Int64`     |
//! | other number           | `Float64`   |
//! | boolean                | `UInt8`     |
//! | date-like string       | `DateTime`  |
//! | anything else          | `String`    |

mod datetime;
mod inference;

pub use datetime::{
    format_datetime, is_datetime, min_datetime, normalize_datetime, parse_datetime,
    CANONICAL_FORMAT, MIN_DATETIME,
};
pub use inference::{infer_mapping, sanitize_name, MappingInferrer};
