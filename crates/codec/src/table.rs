use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};
use shardex_common::{Result, ShardexError};

use crate::convert::convert_tuple;
use crate::key::encode_key;
use crate::value::{Tuple, Value};

/// One storage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Encodes full table rows to key/value records and back.
///
/// The key is the order-preserving encoding of the key columns; the value
/// carries the whole row.
#[derive(Debug, Clone)]
pub struct TableCodec {
    schema: SchemaRef,
    key_columns: Vec<usize>,
}

impl TableCodec {
    pub fn new(schema: SchemaRef, key_columns: Vec<usize>) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(ShardexError::InvalidConfig(
                "table codec needs at least one key column".to_string(),
            ));
        }
        if let Some(bad) = key_columns.iter().find(|&&c| c >= schema.fields().len()) {
            return Err(ShardexError::InvalidConfig(format!(
                "key column {bad} out of range for {} columns",
                schema.fields().len()
            )));
        }
        Ok(Self {
            schema,
            key_columns,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// Encode a row already converted to the table schema.
    pub fn encode(&self, tuple: &[Value]) -> Result<KeyValue> {
        if tuple.len() != self.schema.fields().len() {
            return Err(ShardexError::Codec(format!(
                "row has {} values, table has {} columns",
                tuple.len(),
                self.schema.fields().len()
            )));
        }
        if let Some(i) = tuple
            .iter()
            .position(|v| matches!(v, Value::Double(d) if !d.is_finite()))
        {
            return Err(ShardexError::Codec(format!(
                "non-finite double in column '{}'",
                self.schema.field(i).name()
            )));
        }
        let key = self.encode_key_of_row(tuple)?;
        let value = serde_json::to_vec(tuple)
            .map_err(|e| ShardexError::Codec(format!("row encode failed: {e}")))?;
        Ok(KeyValue { key, value })
    }

    /// Encode the key columns of a full row.
    pub fn encode_key_of_row(&self, tuple: &[Value]) -> Result<Vec<u8>> {
        let mut key = Vec::with_capacity(self.key_columns.len());
        for &c in &self.key_columns {
            let v = &tuple[c];
            if v.is_null() {
                return Err(ShardexError::Codec(format!(
                    "null in key column '{}'",
                    self.schema.field(c).name()
                )));
            }
            key.push(v.clone());
        }
        Ok(encode_key(&key))
    }

    /// Encode a tuple holding only key column values, in key column order.
    pub fn encode_key(&self, key_tuple: &[Value]) -> Result<Vec<u8>> {
        if key_tuple.len() != self.key_columns.len() {
            return Err(ShardexError::Codec(format!(
                "key tuple has {} values, table key has {} columns",
                key_tuple.len(),
                self.key_columns.len()
            )));
        }
        let key_fields = self
            .key_columns
            .iter()
            .map(|&c| self.schema.field(c).clone())
            .collect::<Vec<_>>();
        let converted = convert_tuple(&arrow_schema::Schema::new(key_fields), key_tuple)?;
        Ok(encode_key(&converted))
    }

    pub fn decode(&self, kv: &KeyValue) -> Result<Tuple> {
        let tuple: Tuple = serde_json::from_slice(&kv.value)
            .map_err(|e| ShardexError::Codec(format!("row decode failed: {e}")))?;
        if tuple.len() != self.schema.fields().len() {
            return Err(ShardexError::Codec(format!(
                "stored row has {} values, table has {} columns",
                tuple.len(),
                self.schema.fields().len()
            )));
        }
        Ok(tuple)
    }
}
