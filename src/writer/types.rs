//! Target mutation vocabulary shared by the strategy planner and the target

use serde::{Deserialize, Serialize};
use std::fmt;

/// A table-level mutation run before or after the row load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetMutation {
    /// Remove every row
    Truncate,
    /// Remove rows with `from <= column < to` (open ends allowed)
    DeleteRange {
        column: String,
        from: Option<String>,
        to: Option<String>,
    },
    /// Keep one row per `unique_column`, newest by `order_column` then load order
    Dedupe {
        unique_column: String,
        order_column: Option<String>,
    },
}

impl fmt::Display for TargetMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMutation::Truncate => write!(f, "truncate"),
            TargetMutation::DeleteRange { column, from, to } => write!(
                f,
                "delete {column} in [{}, {})",
                from.as_deref().unwrap_or("-inf"),
                to.as_deref().unwrap_or("+inf")
            ),
            TargetMutation::Dedupe { unique_column, .. } => write!(f, "dedupe on {unique_column}"),
        }
    }
}
