//! # Row Encoding for Overflow Heap Records
//!
//! This module serializes rows written to an overflow heap file and decodes
//! them when they are fetched or scanned back.
//!
//! ## Design Goals
//!
//! 1. **Exact round-trip**: a decoded row equals the encoded one, including
//!    `-0.0`, NaN and the Int/Float distinction
//! 2. **Compact encoding**: one discriminant byte per column, small ints and
//!    zero cost nothing beyond it
//! 3. **No ordering guarantees**: records are located by position, never
//!    compared as bytes
//!
//! ## Encoding Format
//!
//! ```text
//! Row := [col_count: u16] [Column]*
//! Column := [discriminant: u8] [Data]
//!
//! Discriminants:
//!   0x01 = NULL (no data)
//!   0x02 = FALSE (no data)
//!   0x03 = TRUE (no data)
//!   0x10 = NEG_INFINITY (no data)
//!   0x12 = NEG_INT (8 bytes big-endian i64)
//!   0x13 = NEG_FLOAT (8 bytes f64 bits)
//!   0x14 = ZERO (no data, Int(0))
//!   0x15 = POS_FLOAT (8 bytes f64 bits, includes both zeros)
//!   0x16 = POS_INT (8 bytes big-endian i64)
//!   0x18 = POS_INFINITY (no data)
//!   0x19 = NAN (8 bytes f64 bits)
//!   0x20 = TEXT ([len: u32] [utf8_bytes])
//!   0x21 = BLOB ([len: u32] [bytes])
//!   0x33 = TIMESTAMPTZ (8 + 4 bytes: micros + offset_secs)
//!   0x40 = UUID (16 bytes)
//!   0x83 = DECIMAL (16 + 2 bytes: digits as i128 + scale)
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use hashspill::storage::row_codec::RowCodec;
//!
//! let row = vec![Value::Int(42), Value::Text("hello".into())];
//! let mut buf = Vec::with_capacity(64);
//! RowCodec::encode_into(&row, &mut buf);
//!
//! let decoded = RowCodec::decode(&buf)?;
//! assert_eq!(decoded, row);
//! ```

use eyre::{bail, ensure, Result};

use crate::types::Value;

mod discriminant {
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;

    pub const NEG_INFINITY: u8 = 0x10;
    pub const NEG_INT: u8 = 0x12;
    pub const NEG_FLOAT: u8 = 0x13;
    pub const ZERO: u8 = 0x14;
    pub const POS_FLOAT: u8 = 0x15;
    pub const POS_INT: u8 = 0x16;
    pub const POS_INFINITY: u8 = 0x18;
    pub const NAN: u8 = 0x19;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;

    pub const TIMESTAMPTZ: u8 = 0x33;

    pub const UUID: u8 = 0x40;

    pub const DECIMAL: u8 = 0x83;
}

pub struct RowCodec;

impl RowCodec {
    pub fn encode_into(row: &[Value], buf: &mut Vec<u8>) {
        buf.reserve(Self::encoded_size(row));
        buf.extend_from_slice(&(row.len() as u16).to_be_bytes());

        for value in row {
            Self::encode_value_into(value, buf);
        }
    }

    /// Exact number of bytes `encode_into` appends for `row`.
    fn encoded_size(row: &[Value]) -> usize {
        2 + row.iter().map(Self::value_size).sum::<usize>()
    }

    fn value_size(value: &Value) -> usize {
        match value {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(0) => 1,
            Value::Int(_) => 9,
            Value::Float(f) if f.is_infinite() => 1,
            Value::Float(_) => 9,
            Value::Text(s) => 5 + s.len(),
            Value::Blob(b) => 5 + b.len(),
            Value::Uuid(_) => 17,
            Value::TimestampTz { .. } => 13,
            Value::Decimal { .. } => 19,
        }
    }

    fn encode_value_into(value: &Value, buf: &mut Vec<u8>) {
        match value {
            Value::Null => buf.push(discriminant::NULL),
            Value::Bool(false) => buf.push(discriminant::FALSE),
            Value::Bool(true) => buf.push(discriminant::TRUE),
            Value::Int(i) => {
                if *i < 0 {
                    buf.push(discriminant::NEG_INT);
                    buf.extend_from_slice(&i.to_be_bytes());
                } else if *i == 0 {
                    buf.push(discriminant::ZERO);
                } else {
                    buf.push(discriminant::POS_INT);
                    buf.extend_from_slice(&i.to_be_bytes());
                }
            }
            Value::Float(f) => {
                if f.is_nan() {
                    buf.push(discriminant::NAN);
                    buf.extend_from_slice(&f.to_bits().to_be_bytes());
                } else if *f == f64::NEG_INFINITY {
                    buf.push(discriminant::NEG_INFINITY);
                } else if *f == f64::INFINITY {
                    buf.push(discriminant::POS_INFINITY);
                } else if *f < 0.0 {
                    buf.push(discriminant::NEG_FLOAT);
                    buf.extend_from_slice(&f.to_bits().to_be_bytes());
                } else {
                    buf.push(discriminant::POS_FLOAT);
                    buf.extend_from_slice(&f.to_bits().to_be_bytes());
                }
            }
            Value::Text(s) => {
                buf.push(discriminant::TEXT);
                let bytes = s.as_bytes();
                buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
            Value::Blob(b) => {
                buf.push(discriminant::BLOB);
                buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
                buf.extend_from_slice(b);
            }
            Value::Uuid(u) => {
                buf.push(discriminant::UUID);
                buf.extend_from_slice(u);
            }
            Value::TimestampTz {
                micros,
                offset_secs,
            } => {
                buf.push(discriminant::TIMESTAMPTZ);
                buf.extend_from_slice(&micros.to_be_bytes());
                buf.extend_from_slice(&offset_secs.to_be_bytes());
            }
            Value::Decimal { digits, scale } => {
                buf.push(discriminant::DECIMAL);
                buf.extend_from_slice(&digits.to_be_bytes());
                buf.extend_from_slice(&scale.to_be_bytes());
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Vec<Value>> {
        let mut offset = 0;
        let row = Self::decode_at(data, &mut offset)?;
        ensure!(
            offset == data.len(),
            "trailing {} bytes after encoded row",
            data.len() - offset
        );
        Ok(row)
    }

    pub fn decode_at(data: &[u8], offset: &mut usize) -> Result<Vec<Value>> {
        ensure!(
            data.len() >= *offset + 2,
            "truncated row: missing column count"
        );

        let col_count = u16::from_be_bytes([data[*offset], data[*offset + 1]]) as usize;
        *offset += 2;

        let mut out = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            out.push(Self::decode_value(data, offset)?);
        }

        Ok(out)
    }

    fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize, what: &str) -> Result<&'a [u8]> {
        ensure!(data.len() >= *offset + len, "truncated {}", what);
        let slice = &data[*offset..*offset + len];
        *offset += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(data: &[u8], offset: &mut usize, what: &str) -> Result<[u8; N]> {
        let slice = Self::take(data, offset, N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn decode_value(data: &[u8], offset: &mut usize) -> Result<Value> {
        ensure!(data.len() > *offset, "truncated row: missing discriminant");

        let disc = data[*offset];
        *offset += 1;

        match disc {
            discriminant::NULL => Ok(Value::Null),
            discriminant::FALSE => Ok(Value::Bool(false)),
            discriminant::TRUE => Ok(Value::Bool(true)),

            discriminant::ZERO => Ok(Value::Int(0)),

            discriminant::NEG_INT | discriminant::POS_INT => {
                let bytes = Self::take_array::<8>(data, offset, "int")?;
                Ok(Value::Int(i64::from_be_bytes(bytes)))
            }

            discriminant::NEG_INFINITY => Ok(Value::Float(f64::NEG_INFINITY)),
            discriminant::POS_INFINITY => Ok(Value::Float(f64::INFINITY)),

            discriminant::NEG_FLOAT | discriminant::POS_FLOAT | discriminant::NAN => {
                let bytes = Self::take_array::<8>(data, offset, "float")?;
                Ok(Value::Float(f64::from_bits(u64::from_be_bytes(bytes))))
            }

            discriminant::TEXT => {
                let len = u32::from_be_bytes(Self::take_array::<4>(data, offset, "text length")?)
                    as usize;
                let bytes = Self::take(data, offset, len, "text")?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| eyre::eyre!("invalid utf-8 in text column: {}", e))?;
                Ok(Value::Text(s.to_string()))
            }

            discriminant::BLOB => {
                let len = u32::from_be_bytes(Self::take_array::<4>(data, offset, "blob length")?)
                    as usize;
                let bytes = Self::take(data, offset, len, "blob")?;
                Ok(Value::Blob(bytes.to_vec()))
            }

            discriminant::UUID => Ok(Value::Uuid(Self::take_array::<16>(data, offset, "uuid")?)),

            discriminant::TIMESTAMPTZ => {
                let micros = i64::from_be_bytes(Self::take_array::<8>(data, offset, "timestamp")?);
                let offset_secs =
                    i32::from_be_bytes(Self::take_array::<4>(data, offset, "timestamp offset")?);
                Ok(Value::TimestampTz {
                    micros,
                    offset_secs,
                })
            }

            discriminant::DECIMAL => {
                let digits = i128::from_be_bytes(Self::take_array::<16>(data, offset, "decimal")?);
                let scale =
                    i16::from_be_bytes(Self::take_array::<2>(data, offset, "decimal scale")?);
                Ok(Value::Decimal { digits, scale })
            }

            other => bail!("unknown column discriminant {:#04x}", other),
        }
    }
}
