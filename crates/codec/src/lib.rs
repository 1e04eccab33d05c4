//! Typed tuple values and the byte codecs built on them.
//!
//! Key modules:
//! - [`value`]: the [`Value`]/[`Tuple`] row representation
//! - [`convert`]: coercion of tuples into a target schema
//! - [`key`]: order-preserving key encoding used for routing and storage keys
//! - [`table`]: table key/value codec
//! - [`ipc`]: Arrow IPC framing of tuple batches for the exchange

pub mod convert;
pub mod ipc;
pub mod key;
pub mod table;
pub mod value;

pub use convert::{convert_tuple, convert_value};
pub use ipc::{decode_tuples, encode_tuples};
pub use key::encode_key;
pub use table::{KeyValue, TableCodec};
pub use value::{Tuple, Value};
