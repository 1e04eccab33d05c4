//! Order-preserving key encoding.
//!
//! For two key tuples of the same column types, the byte-wise comparison of
//! their encodings matches the value-wise comparison of the tuples. Routing by
//! range boundaries relies on this.

use crate::value::Value;

const NULL_FLAG: u8 = 0x00;
const BOOL_FLAG: u8 = 0x01;
const INT_FLAG: u8 = 0x02;
const DOUBLE_FLAG: u8 = 0x03;
const BYTES_FLAG: u8 = 0x04;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Encode key values into a memcomparable byte string.
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 9);
    for v in values {
        encode_value(v, &mut out);
    }
    out
}

fn encode_value(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Null => out.push(NULL_FLAG),
        Value::Bool(b) => {
            out.push(BOOL_FLAG);
            out.push(u8::from(*b));
        }
        Value::Int(i) | Value::Timestamp(i) => {
            out.push(INT_FLAG);
            out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
        }
        Value::Double(d) => {
            out.push(DOUBLE_FLAG);
            let bits = d.to_bits();
            let ordered = if bits & (1 << 63) != 0 {
                !bits
            } else {
                bits | (1 << 63)
            };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Value::Str(s) => encode_bytes(s.as_bytes(), out),
        Value::Bytes(b) => encode_bytes(b, out),
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(BYTES_FLAG);
    for &b in bytes {
        if b == 0 {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}
