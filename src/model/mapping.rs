//! Column mapping schema list
//!
//! A mapping is a tagged, versioned list of `{source, target, type}` entries.
//! It is inferred once from the first observed batch and then stays fixed
//! until someone reconfigures the dataset.

use crate::error::{Error, Result};
use arrow::datatypes::{DataType, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Target column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit signed integer
    Int64,
    /// 64-bit float
    Float64,
    /// Decimal values, stored as 64-bit float
    Decimal,
    /// 1-byte unsigned integer (booleans)
    UInt8,
    /// Date-time normalized to `YYYY-MM-DD HH:MM:SS[.ffffff]`
    DateTime,
    /// Anything else
    String,
}

impl ColumnType {
    /// DuckDB column type used in `CREATE TABLE`
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Int64 => "BIGINT",
            ColumnType::Float64 | ColumnType::Decimal => "DOUBLE",
            ColumnType::UInt8 => "UTINYINT",
            ColumnType::DateTime => "TIMESTAMP",
            ColumnType::String => "VARCHAR",
        }
    }

    /// Arrow type of the in-flight column
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 | ColumnType::Decimal => DataType::Float64,
            ColumnType::UInt8 => DataType::UInt8,
            ColumnType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::String => DataType::Utf8,
        }
    }

    /// Numeric columns compare watermarks without quoting
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int64 | ColumnType::Float64 | ColumnType::Decimal | ColumnType::UInt8
        )
    }
}

/// One `{source, target, type}` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedColumn {
    /// Column name as returned by the source
    pub source: String,
    /// Sanitized target column name
    pub target: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl MappedColumn {
    pub fn new(source: impl Into<String>, target: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            column_type: ty,
        }
    }
}

/// Versioned column mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum ColumnMapping {
    #[serde(rename = "1")]
    V1 { columns: Vec<MappedColumn> },
}

impl ColumnMapping {
    /// Create a mapping at the current version
    pub fn new(columns: Vec<MappedColumn>) -> Self {
        ColumnMapping::V1 { columns }
    }

    /// Schema version number
    pub fn version(&self) -> u32 {
        match self {
            ColumnMapping::V1 { .. } => 1,
        }
    }

    pub fn columns(&self) -> &[MappedColumn] {
        match self {
            ColumnMapping::V1 { columns } => columns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    /// Mapped entry for a source column (case-insensitive)
    pub fn by_source(&self, source: &str) -> Option<&MappedColumn> {
        self.columns()
            .iter()
            .find(|c| c.source.eq_ignore_ascii_case(source))
    }

    /// Target column name for a source column
    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.by_source(source).map(|c| c.target.as_str())
    }

    /// Validation applied at dataset-save time
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::config("column mapping must not be empty"));
        }

        let mut seen = HashSet::new();
        for column in self.columns() {
            if column.source.is_empty() {
                return Err(Error::config("column mapping has an empty source name"));
            }
            if !is_sanitized(&column.target) {
                return Err(Error::config(format!(
                    "target column '{}' must match [A-Za-z0-9_]+",
                    column.target
                )));
            }
            if !seen.insert(column.target.to_lowercase()) {
                return Err(Error::config(format!(
                    "duplicate target column '{}'",
                    column.target
                )));
            }
        }
        Ok(())
    }
}

/// Whether a name only contains `[A-Za-z0-9_]`
pub fn is_sanitized(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
