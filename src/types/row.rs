use eyre::{bail, Result};

use super::Value;

/// Location of a row in the base table it was read from.
///
/// Opaque to the hash table: it is carried alongside the row and handed back
/// unchanged on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowLocation(pub u64);

impl std::fmt::Display for RowLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub values: Vec<Value>,
    pub location: Option<RowLocation>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            location: None,
        }
    }

    pub fn located(values: Vec<Value>, location: RowLocation) -> Self {
        Self {
            values,
            location: Some(location),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_int(&self, index: usize) -> Result<i64> {
        match self.get(index) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => bail!("expected INT, got {:?}", other),
            None => bail!("column {} out of bounds", index),
        }
    }

    pub fn get_text(&self, index: usize) -> Result<&str> {
        match self.get(index) {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => bail!("expected TEXT, got {:?}", other),
            None => bail!("column {} out of bounds", index),
        }
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.get(index), Some(Value::Null))
    }

    /// True when any of `columns` holds NULL.
    pub fn has_null_in(&self, columns: &[usize]) -> bool {
        columns.iter().any(|&c| self.is_null(c))
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Builds a row from a list of values convertible into [`Value`].
///
/// ```ignore
/// let r = row![1i64, "a"];
/// ```
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        $crate::types::Row::new(vec![$($crate::types::Value::from($v)),*])
    };
}
