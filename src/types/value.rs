//! # Column Value Representation
//!
//! `Value` is the owned, heap-backed column value held by retained rows.
//! Rows handed to a hash table outlive the buffers they were read from, so
//! unlike a page-borrowing representation every variant owns its data.
//!
//! ## Value Variants
//!
//! | Variant | Rust Type | Description |
//! |---------|-----------|-------------|
//! | Null | - | SQL NULL |
//! | Bool | bool | Boolean |
//! | Int | i64 | 64-bit signed integer |
//! | Float | f64 | 64-bit floating point |
//! | Text | String | UTF-8 string |
//! | Blob | Vec<u8> | Binary data |
//! | Uuid | [u8; 16] | UUID bytes |
//! | TimestampTz | {micros, offset} | Timestamp with timezone |
//! | Decimal | {digits, scale} | Scaled decimal |
//!
//! ## Equality and Hashing
//!
//! Values are used as hash keys, so equality must be reflexive. Floats compare
//! by normalized bit pattern: `-0.0` equals `0.0` and every NaN equals every
//! other NaN. `Null` equals `Null` here; callers that want SQL semantics skip
//! null keys before they reach the table.
//!
//! `hash_code()` is stable for the life of the process, which is all the
//! overflow index needs: hashes are never persisted past a single table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem::size_of;

use super::DataType;

/// Owned column value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Uuid([u8; 16]),
    TimestampTz { micros: i64, offset_secs: i32 },
    Decimal { digits: i128, scale: i16 },
}

fn normalized_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0u64
    } else {
        f.to_bits()
    }
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Storage type of the value, `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int8),
            Value::Float(_) => Some(DataType::Float8),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
            Value::Uuid(_) => Some(DataType::Uuid),
            Value::TimestampTz { .. } => Some(DataType::TimestampTz),
            Value::Decimal { .. } => Some(DataType::Decimal),
        }
    }

    /// Estimated heap footprint of this value in bytes.
    ///
    /// Counts the enum slot plus any owned buffer. Allocator slack is ignored.
    pub fn estimate_memory_usage(&self) -> usize {
        let inline = size_of::<Value>();
        match self {
            Value::Text(s) => inline + s.capacity(),
            Value::Blob(b) => inline + b.capacity(),
            _ => inline,
        }
    }

    /// Feeds this value into `hasher`, consistent with `PartialEq`.
    pub fn hash_to<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => b.hash(hasher),
            Value::Int(i) => i.hash(hasher),
            Value::Float(f) => normalized_float_bits(*f).hash(hasher),
            Value::Text(s) => s.hash(hasher),
            Value::Blob(b) => b.hash(hasher),
            Value::Uuid(u) => u.hash(hasher),
            Value::TimestampTz {
                micros,
                offset_secs,
            } => {
                micros.hash(hasher);
                offset_secs.hash(hasher);
            }
            Value::Decimal { digits, scale } => {
                digits.hash(hasher);
                scale.hash(hasher);
            }
        }
    }

    /// Stable 64-bit hash of this value.
    pub fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_to(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                normalized_float_bits(*a) == normalized_float_bits(*b)
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (
                Value::TimestampTz {
                    micros: am,
                    offset_secs: ao,
                },
                Value::TimestampTz {
                    micros: bm,
                    offset_secs: bo,
                },
            ) => am == bm && ao == bo,
            (
                Value::Decimal {
                    digits: ad,
                    scale: as_,
                },
                Value::Decimal {
                    digits: bd,
                    scale: bs,
                },
            ) => ad == bd && as_ == bs,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_to(state);
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Uuid(u) => {
                for (i, byte) in u.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::TimestampTz {
                micros,
                offset_secs,
            } => write!(f, "{}us{:+}s", micros, offset_secs),
            Value::Decimal { digits, scale } => {
                if *scale <= 0 {
                    write!(f, "{}", digits)
                } else {
                    let divisor = 10i128.pow(*scale as u32);
                    write!(
                        f,
                        "{}.{:0>width$}",
                        digits / divisor,
                        (digits % divisor).abs(),
                        width = *scale as usize
                    )
                }
            }
        }
    }
}
