//! Grouping keys built from a row's key columns.
//!
//! A single key column yields [`HashKey::Single`] holding that value as is.
//! Several key columns yield [`HashKey::Composite`], a copy of the values in
//! key-column order.
//!
//! Composite equality is position by position, but the hash is the wrapping
//! sum of the member hashes, so `(1, 2)` and `(2, 1)` share a hash while
//! comparing unequal. Collisions cost an extra comparison, never a wrong
//! answer.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashKey {
    Single(Value),
    Composite(SmallVec<[Value; 4]>),
}

impl HashKey {
    /// Builds the key of `values` over `key_columns`.
    ///
    /// # Panics
    ///
    /// Panics if a key column is out of range for `values`.
    pub fn from_row(values: &[Value], key_columns: &[usize]) -> Self {
        match key_columns {
            [column] => HashKey::Single(values[*column].clone()),
            columns => HashKey::Composite(columns.iter().map(|&c| values[c].clone()).collect()),
        }
    }

    /// Builds a probe key from key values given in key-column order.
    pub fn new<I: IntoIterator<Item = Value>>(values: I) -> Self {
        let mut values: SmallVec<[Value; 4]> = values.into_iter().collect();
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return HashKey::Single(value);
            }
        }
        HashKey::Composite(values)
    }

    pub fn hash_code(&self) -> u64 {
        match self {
            HashKey::Single(value) => value.hash_code(),
            HashKey::Composite(values) => values
                .iter()
                .fold(0u64, |acc, v| acc.wrapping_add(v.hash_code())),
        }
    }

    /// True if the key columns of `values` equal this key.
    pub fn matches(&self, values: &[Value], key_columns: &[usize]) -> bool {
        match self {
            HashKey::Single(key) => {
                key_columns.len() == 1 && values.get(key_columns[0]) == Some(key)
            }
            HashKey::Composite(keys) => {
                keys.len() == key_columns.len()
                    && keys
                        .iter()
                        .zip(key_columns)
                        .all(|(k, &c)| values.get(c) == Some(k))
            }
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            HashKey::Single(value) => std::slice::from_ref(value),
            HashKey::Composite(values) => values,
        }
    }
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl From<Value> for HashKey {
    fn from(value: Value) -> Self {
        HashKey::Single(value)
    }
}

impl From<i64> for HashKey {
    fn from(value: i64) -> Self {
        HashKey::Single(Value::Int(value))
    }
}

impl From<&str> for HashKey {
    fn from(value: &str) -> Self {
        HashKey::Single(Value::from(value))
    }
}
