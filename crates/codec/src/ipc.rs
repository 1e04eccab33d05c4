//! Arrow IPC framing for tuple batches crossing the exchange.
//!
//! A send operator buffers tuples, turns them into one `RecordBatch` and ships
//! the IPC stream bytes as a single payload. The receive side decodes the
//! payload back into tuples in the original order.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, BooleanArray, BooleanBuilder, Float64Array,
    Float64Builder, Int64Array, Int64Builder, NullArray, StringArray, StringBuilder,
    TimestampMillisecondArray, TimestampMillisecondBuilder,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, SchemaRef, TimeUnit};
use shardex_common::{Result, ShardexError};

use crate::value::{Tuple, Value};

/// Build one record batch from row tuples.
pub fn tuples_to_batch(schema: &SchemaRef, tuples: &[Tuple]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| build_column(field, idx, tuples))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| ShardexError::Codec(format!("record batch build failed: {e}")))
}

fn build_column(field: &Field, idx: usize, tuples: &[Tuple]) -> Result<ArrayRef> {
    let cell = |t: &Tuple| -> Result<Value> {
        t.get(idx).cloned().ok_or_else(|| {
            ShardexError::Codec(format!("tuple is missing column '{}'", field.name()))
        })
    };
    let mismatch = |v: &Value| {
        ShardexError::Codec(format!(
            "column '{}' of type {} cannot hold {} value",
            field.name(),
            field.data_type(),
            v.type_name()
        ))
    };
    let n = tuples.len();
    let array: ArrayRef = match field.data_type() {
        DataType::Null => Arc::new(NullArray::new(n)),
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(n);
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Bool(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(n);
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Int(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(n);
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Double(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(n, n * 16);
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Str(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Binary => {
            let mut b = BinaryBuilder::with_capacity(n, n * 16);
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Bytes(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Timestamp(TimeUnit::Millisecond, tz) => {
            let mut b = TimestampMillisecondBuilder::with_capacity(n).with_timezone_opt(tz.clone());
            for t in tuples {
                match cell(t)? {
                    Value::Null => b.append_null(),
                    Value::Timestamp(v) => b.append_value(v),
                    other => return Err(mismatch(&other)),
                }
            }
            Arc::new(b.finish())
        }
        other => {
            return Err(ShardexError::Unsupported(format!(
                "column '{}' has unsupported type {other}",
                field.name()
            )))
        }
    };
    Ok(array)
}

/// Flatten a record batch back into row tuples.
pub fn batch_to_tuples(batch: &RecordBatch) -> Result<Vec<Tuple>> {
    let mut rows: Vec<Tuple> = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(batch.num_columns()))
        .collect();
    let schema = batch.schema();
    for (col, field) in batch.columns().iter().zip(schema.fields()) {
        for (row, out) in rows.iter_mut().enumerate() {
            out.push(cell_value(col, field, row)?);
        }
    }
    Ok(rows)
}

fn cell_value(col: &ArrayRef, field: &Field, row: usize) -> Result<Value> {
    if col.is_null(row) {
        return Ok(Value::Null);
    }
    let downcast_err = || {
        ShardexError::Codec(format!(
            "column '{}' array does not match declared type {}",
            field.name(),
            field.data_type()
        ))
    };
    let v = match field.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => Value::Bool(
            col.as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(downcast_err)?
                .value(row),
        ),
        DataType::Int64 => Value::Int(
            col.as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(downcast_err)?
                .value(row),
        ),
        DataType::Float64 => Value::Double(
            col.as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(downcast_err)?
                .value(row),
        ),
        DataType::Utf8 => Value::Str(
            col.as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(downcast_err)?
                .value(row)
                .to_string(),
        ),
        DataType::Binary => Value::Bytes(
            col.as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(downcast_err)?
                .value(row)
                .to_vec(),
        ),
        DataType::Timestamp(TimeUnit::Millisecond, _) => Value::Timestamp(
            col.as_any()
                .downcast_ref::<TimestampMillisecondArray>()
                .ok_or_else(downcast_err)?
                .value(row),
        ),
        other => {
            return Err(ShardexError::Unsupported(format!(
                "column '{}' has unsupported type {other}",
                field.name()
            )))
        }
    };
    Ok(v)
}

/// Encode tuples as one IPC stream payload.
pub fn encode_tuples(schema: &SchemaRef, tuples: &[Tuple]) -> Result<Vec<u8>> {
    let batch = tuples_to_batch(schema, tuples)?;
    let mut buf = Vec::new();
    {
        let mut writer = arrow::ipc::writer::StreamWriter::try_new(&mut buf, schema.as_ref())
            .map_err(|e| ShardexError::Codec(format!("ipc writer init failed: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| ShardexError::Codec(format!("ipc write failed: {e}")))?;
        writer
            .finish()
            .map_err(|e| ShardexError::Codec(format!("ipc finish failed: {e}")))?;
    }
    Ok(buf)
}

/// Decode an IPC stream payload into tuples.
pub fn decode_tuples(bytes: &[u8]) -> Result<Vec<Tuple>> {
    let reader = arrow::ipc::reader::StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| ShardexError::Codec(format!("ipc reader init failed: {e}")))?;
    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| ShardexError::Codec(format!("ipc read failed: {e}")))?;
        out.extend(batch_to_tuples(&batch)?);
    }
    Ok(out)
}
