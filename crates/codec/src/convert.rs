//! Value converter: coerces execution tuples into the storage representation
//! declared by a table schema.
//!
//! Conversions are strict. A value that cannot represent the target type is a
//! codec error, never a silent null or truncation.

use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{NaiveDateTime, TimeZone, Utc};
use shardex_common::{Result, ShardexError};

use crate::value::{Tuple, Value};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// 2^63: doubles in `[-2^63, 2^63)` fit an `i64` exactly when integral.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Convert every cell of `tuple` to the matching field of `schema`.
pub fn convert_tuple(schema: &Schema, tuple: &[Value]) -> Result<Tuple> {
    if tuple.len() != schema.fields().len() {
        return Err(ShardexError::Codec(format!(
            "tuple has {} values but schema expects {}",
            tuple.len(),
            schema.fields().len()
        )));
    }
    schema
        .fields()
        .iter()
        .zip(tuple)
        .map(|(field, value)| convert_field(field, value))
        .collect()
}

fn convert_field(field: &Field, value: &Value) -> Result<Value> {
    if value.is_null() {
        if field.is_nullable() {
            return Ok(Value::Null);
        }
        return Err(ShardexError::Codec(format!(
            "null value for non-nullable column '{}'",
            field.name()
        )));
    }
    convert_value(field.data_type(), value).map_err(|e| match e {
        ShardexError::Codec(msg) => ShardexError::Codec(format!("column '{}': {msg}", field.name())),
        other => other,
    })
}

/// Convert a single non-null value to `data_type`.
pub fn convert_value(data_type: &DataType, value: &Value) -> Result<Value> {
    let mismatch = || {
        ShardexError::Codec(format!(
            "cannot convert {} value {value} to {data_type}",
            value.type_name()
        ))
    };
    let out = match (data_type, value) {
        (_, Value::Null) => Value::Null,
        (DataType::Boolean, Value::Bool(v)) => Value::Bool(*v),
        (DataType::Boolean, Value::Int(0)) => Value::Bool(false),
        (DataType::Boolean, Value::Int(1)) => Value::Bool(true),

        (DataType::Int64, Value::Int(v)) => Value::Int(*v),
        (DataType::Int64, Value::Double(v))
            if v.fract() == 0.0 && *v >= -I64_BOUND && *v < I64_BOUND =>
        {
            Value::Int(*v as i64)
        }
        (DataType::Int64, Value::Str(s)) => {
            Value::Int(s.trim().parse::<i64>().map_err(|_| mismatch())?)
        }

        // NaN and infinities have no stored form
        (DataType::Float64, Value::Double(v)) if v.is_finite() => Value::Double(*v),
        (DataType::Float64, Value::Int(v)) => Value::Double(*v as f64),
        (DataType::Float64, Value::Str(s)) => {
            let v = s.trim().parse::<f64>().map_err(|_| mismatch())?;
            if !v.is_finite() {
                return Err(mismatch());
            }
            Value::Double(v)
        }

        (DataType::Utf8, Value::Str(s)) => Value::Str(s.clone()),

        (DataType::Binary, Value::Bytes(b)) => Value::Bytes(b.clone()),
        (DataType::Binary, Value::Str(s)) => Value::Bytes(s.as_bytes().to_vec()),

        (DataType::Timestamp(TimeUnit::Millisecond, _), Value::Timestamp(v)) => {
            Value::Timestamp(*v)
        }
        (DataType::Timestamp(TimeUnit::Millisecond, _), Value::Int(v)) => Value::Timestamp(*v),
        (DataType::Timestamp(TimeUnit::Millisecond, _), Value::Str(s)) => {
            Value::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?)
        }
        _ => return Err(mismatch()),
    };
    Ok(out)
}

fn parse_timestamp(s: &str) -> Option<i64> {
    TIMESTAMP_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s.trim(), fmt)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
    })
}

/// Whether the tuple layer can carry columns of `data_type`.
pub fn is_supported_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Null
            | DataType::Boolean
            | DataType::Int64
            | DataType::Float64
            | DataType::Utf8
            | DataType::Binary
            | DataType::Timestamp(TimeUnit::Millisecond, _)
    )
}
