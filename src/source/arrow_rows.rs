//! Arrow record batch to row conversion

use crate::error::{Error, Result};
use crate::mapping::format_datetime;
use crate::types::{JsonValue, Row};
use arrow::array::{
    Array, BooleanArray, Date32Array, Date64Array, Decimal128Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

/// Downcast or fail with an extraction error
macro_rules! downcast {
    ($array:expr, $ty:ty) => {
        $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| Error::Extraction {
                message: format!("Failed to downcast to {}", stringify!($ty)),
            })?
    };
}

/// Convert every row of a batch, keeping column order
pub fn record_batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());

    for row_idx in 0..batch.num_rows() {
        let mut row = Row::with_capacity(schema.fields().len());
        for (col_idx, field) in schema.fields().iter().enumerate() {
            let value = array_value(batch.column(col_idx).as_ref(), row_idx)?;
            row.insert(field.name().clone(), value);
        }
        rows.push(row);
    }

    Ok(rows)
}

fn number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value).map_or(JsonValue::Null, JsonValue::Number)
}

/// Convert a single array element
fn array_value(array: &dyn Array, row: usize) -> Result<JsonValue> {
    if array.is_null(row) {
        return Ok(JsonValue::Null);
    }

    let value = match array.data_type() {
        DataType::Null => JsonValue::Null,
        DataType::Boolean => JsonValue::Bool(downcast!(array, BooleanArray).value(row)),
        DataType::Int8 => downcast!(array, Int8Array).value(row).into(),
        DataType::Int16 => downcast!(array, Int16Array).value(row).into(),
        DataType::Int32 => downcast!(array, Int32Array).value(row).into(),
        DataType::Int64 => downcast!(array, Int64Array).value(row).into(),
        DataType::UInt8 => downcast!(array, UInt8Array).value(row).into(),
        DataType::UInt16 => downcast!(array, UInt16Array).value(row).into(),
        DataType::UInt32 => downcast!(array, UInt32Array).value(row).into(),
        DataType::UInt64 => downcast!(array, UInt64Array).value(row).into(),
        DataType::Float32 => number(f64::from(downcast!(array, Float32Array).value(row))),
        DataType::Float64 => number(downcast!(array, Float64Array).value(row)),
        DataType::Decimal128(_, _) => {
            let text = downcast!(array, Decimal128Array).value_as_string(row);
            text.parse::<f64>().map_or(JsonValue::String(text), number)
        }
        DataType::Utf8 => JsonValue::String(downcast!(array, StringArray).value(row).to_string()),
        DataType::LargeUtf8 => {
            JsonValue::String(downcast!(array, LargeStringArray).value(row).to_string())
        }
        DataType::Date32 => date_value(downcast!(array, Date32Array).value_as_datetime(row)),
        DataType::Date64 => date_value(downcast!(array, Date64Array).value_as_datetime(row)),
        DataType::Timestamp(unit, _) => date_value(match unit {
            TimeUnit::Second => downcast!(array, TimestampSecondArray).value_as_datetime(row),
            TimeUnit::Millisecond => {
                downcast!(array, TimestampMillisecondArray).value_as_datetime(row)
            }
            TimeUnit::Microsecond => {
                downcast!(array, TimestampMicrosecondArray).value_as_datetime(row)
            }
            TimeUnit::Nanosecond => {
                downcast!(array, TimestampNanosecondArray).value_as_datetime(row)
            }
        }),
        // Everything else travels as its display string
        _ => JsonValue::String(array_value_to_string(array, row).map_err(|e| {
            Error::Extraction {
                message: format!("Failed to render {} value: {e}", array.data_type()),
            }
        })?),
    };

    Ok(value)
}

fn date_value(value: Option<chrono::NaiveDateTime>) -> JsonValue {
    value.map_or(JsonValue::Null, |dt| JsonValue::String(format_datetime(&dt)))
}
