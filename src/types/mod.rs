//! # Row and Value Types
//!
//! The value model rows are built from. The hash table needs three things from
//! it: value equality, a stable hash, and a byte-size estimate; everything
//! here exists to provide those.
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `DataType` | Storage-level type discriminant fixed per overflow column |
//! | `Value` | Owned column value |
//! | `Row` | Column values plus an optional base-table location |
//! | `RowLocation` | Opaque location marker carried with a row |
//!
//! ## Usage
//!
//! ```ignore
//! use hashspill::types::{Row, RowLocation, Value};
//!
//! let row = Row::located(vec![Value::Int(1), Value::Text("a".into())], RowLocation(7));
//! assert_eq!(row.get_int(0)?, 1);
//! ```

mod data_type;
mod row;
mod value;

pub use data_type::DataType;
pub use row::{Row, RowLocation};
pub use value::Value;
