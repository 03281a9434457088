//! Row to Arrow conversion
//!
//! Applies the load-time transformation rules while building the columnar
//! batch handed to the target:
//!
//! - missing or null values default by declared type: numbers to `0`,
//!   date-times to the `1970-01-01 00:00:00` sentinel, strings to `''`
//! - date-like values normalize to `YYYY-MM-DD HH:MM:SS[.ffffff]`; a non-null
//!   value that does not parse as a date becomes NULL in a date-time column
//! - a non-null value of the wrong kind for a numeric column becomes `0`;
//!   such coercions are counted per batch and logged

use crate::error::{Error, Result};
use crate::mapping::{min_datetime, normalize_datetime, parse_datetime};
use crate::model::{ColumnMapping, ColumnType};
use crate::types::{JsonValue, Row};
use arrow::array::{
    ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray, UInt8Array,
};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::debug;

/// Arrow schema of the target table described by a mapping
pub fn mapping_schema(mapping: &ColumnMapping) -> SchemaRef {
    let fields: Vec<Field> = mapping
        .columns()
        .iter()
        .map(|c| Field::new(&c.target, c.column_type.arrow_type(), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Convert source rows to a RecordBatch following the mapping
pub fn rows_to_record_batch(rows: &[Row], mapping: &ColumnMapping) -> Result<RecordBatch> {
    convert_rows(rows, mapping).map(|(batch, _)| batch)
}

/// Like `rows_to_record_batch`, also returning how many non-null values
/// could not be converted to their column type
pub(crate) fn convert_rows(rows: &[Row], mapping: &ColumnMapping) -> Result<(RecordBatch, u64)> {
    let schema = mapping_schema(mapping);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(mapping.columns().len());
    let mut coerced = 0u64;

    for column in mapping.columns() {
        let values: Vec<Option<&JsonValue>> = rows
            .iter()
            .map(|row| lookup(row, &column.source))
            .collect();
        let (array, column_coerced) = build_array(&values, column.column_type);
        if column_coerced > 0 {
            debug!(
                column = %column.target,
                coerced = column_coerced,
                "Values did not match column type"
            );
        }
        coerced += column_coerced;
        columns.push(array);
    }

    let batch = RecordBatch::try_new(schema, columns).map_err(|e| Error::Load {
        message: format!("Failed to create RecordBatch: {e}"),
    })?;
    Ok((batch, coerced))
}

/// Exact key first, then a case-insensitive match
fn lookup<'a>(row: &'a Row, source: &str) -> Option<&'a JsonValue> {
    row.get(source).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(source))
            .map(|(_, v)| v)
    })
}

/// Present, non-null, and not convertible
fn is_coerced<T>(value: Option<&JsonValue>, converted: &Option<T>) -> bool {
    converted.is_none() && !matches!(value, None | Some(JsonValue::Null))
}

/// Numeric column: missing, null and unconvertible values all load as `zero`
fn numeric<T: Copy>(
    values: &[Option<&JsonValue>],
    convert: impl Fn(&JsonValue) -> Option<T>,
    zero: T,
    coerced: &mut u64,
) -> Vec<Option<T>> {
    values
        .iter()
        .map(|v| {
            let converted = v.and_then(&convert);
            if is_coerced(*v, &converted) {
                *coerced += 1;
            }
            Some(converted.unwrap_or(zero))
        })
        .collect()
}

/// Build an Arrow array from row values, with its coercion count
fn build_array(values: &[Option<&JsonValue>], column_type: ColumnType) -> (ArrayRef, u64) {
    let mut coerced = 0u64;
    let array: ArrayRef = match column_type {
        ColumnType::Int64 => Arc::new(Int64Array::from(numeric(
            values,
            as_i64,
            0,
            &mut coerced,
        ))),

        ColumnType::Float64 | ColumnType::Decimal => Arc::new(Float64Array::from(numeric(
            values,
            as_f64,
            0.0,
            &mut coerced,
        ))),

        ColumnType::UInt8 => Arc::new(UInt8Array::from(numeric(
            values,
            as_u8,
            0,
            &mut coerced,
        ))),

        ColumnType::DateTime => {
            let sentinel = min_datetime().and_utc().timestamp_micros();
            let arr: TimestampMicrosecondArray = values
                .iter()
                .map(|v| match v {
                    None | Some(JsonValue::Null) => Some(sentinel),
                    Some(JsonValue::String(s)) => {
                        let micros = parse_datetime(s).map(|dt| dt.and_utc().timestamp_micros());
                        if micros.is_none() {
                            coerced += 1;
                        }
                        micros
                    }
                    Some(_) => {
                        coerced += 1;
                        None
                    }
                })
                .collect();
            Arc::new(arr)
        }

        ColumnType::String => {
            let arr: StringArray = values.iter().map(|v| Some(as_text(*v))).collect();
            Arc::new(arr)
        }
    };
    (array, coerced)
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u8(value: &JsonValue) -> Option<u8> {
    match value {
        JsonValue::Bool(b) => Some(u8::from(*b)),
        JsonValue::Number(n) => n.as_u64().map(|n| n.min(u64::from(u8::MAX)) as u8),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" => Some(1),
            "false" | "f" | "no" => Some(0),
            other => other.parse().ok(),
        },
        _ => None,
    }
}

fn as_text(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => normalize_datetime(s).unwrap_or_else(|| s.clone()),
        Some(other) => other.to_string(),
    }
}
