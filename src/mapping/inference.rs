//! Column mapping inference from the first observed row

use super::datetime::is_datetime;
use crate::model::{ColumnMapping, ColumnType, MappedColumn};
use crate::types::{JsonValue, Row};
use std::collections::HashSet;

/// Mapping inferrer with configuration options
#[derive(Debug, Clone)]
pub struct MappingInferrer {
    /// Type date-like strings as `DateTime` instead of `String`
    detect_datetime: bool,
}

impl Default for MappingInferrer {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingInferrer {
    /// Create a new inferrer with default settings
    pub fn new() -> Self {
        Self {
            detect_datetime: true,
        }
    }

    /// Enable/disable datetime detection
    #[must_use]
    pub fn with_datetime_detection(mut self, enabled: bool) -> Self {
        self.detect_datetime = enabled;
        self
    }

    /// Infer a mapping from the first row of a batch.
    ///
    /// Returns `None` for an empty batch (or an empty first row) so the
    /// caller retries on the next batch instead of persisting a broken
    /// mapping.
    pub fn infer(&self, rows: &[Row]) -> Option<ColumnMapping> {
        let first = rows.first()?;
        if first.is_empty() {
            return None;
        }

        let mut used = HashSet::new();
        let columns = first
            .iter()
            .enumerate()
            .map(|(idx, (name, value))| {
                let target = unique_name(sanitize_name(name, idx), &mut used);
                MappedColumn::new(name.clone(), target, self.column_type(value))
            })
            .collect();

        Some(ColumnMapping::new(columns))
    }

    /// Target type of a single value
    pub fn column_type(&self, value: &JsonValue) -> ColumnType {
        match value {
            JsonValue::Bool(_) => ColumnType::UInt8,
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Int64,
            JsonValue::Number(_) => ColumnType::Float64,
            JsonValue::String(s) if self.detect_datetime && is_datetime(s) => ColumnType::DateTime,
            _ => ColumnType::String,
        }
    }
}

/// Infer a mapping with default settings (convenience function)
pub fn infer_mapping(rows: &[Row]) -> Option<ColumnMapping> {
    MappingInferrer::new().infer(rows)
}

/// Reduce a source column name to `[A-Za-z0-9_]`.
///
/// Names with nothing left become `col_<position>`.
pub fn sanitize_name(name: &str, position: usize) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if cleaned.chars().all(|c| c == '_') {
        format!("col_{}", position + 1)
    } else {
        cleaned
    }
}

/// Append `_2`, `_3`... until the name is unused (case-insensitive)
fn unique_name(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_lowercase()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
