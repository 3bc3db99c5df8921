//! # Column Data Types
//!
//! `DataType` is the storage-level discriminant for a column. Overflow heap
//! files fix one `DataType` per column from the template row they are created
//! with; rows appended later must agree with it (or be NULL).
//!
//! The `#[repr(u8)]` keeps the discriminant to a single byte so it can be
//! written straight into encoded rows.

/// Storage-level type of a column value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool = 0,
    Int8 = 1,
    Float8 = 2,
    Text = 3,
    Blob = 4,
    Uuid = 5,
    TimestampTz = 6,
    Decimal = 7,
}

impl DataType {
    /// Returns the encoded size for fixed-width types, `None` for variable-width.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int8 | DataType::Float8 => Some(8),
            DataType::Uuid => Some(16),
            DataType::TimestampTz => Some(12),
            DataType::Decimal => Some(18),
            DataType::Text | DataType::Blob => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int8 => "INT8",
            DataType::Float8 => "FLOAT8",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Uuid => "UUID",
            DataType::TimestampTz => "TIMESTAMPTZ",
            DataType::Decimal => "DECIMAL",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_variable_sizes() {
        assert_eq!(DataType::Int8.fixed_size(), Some(8));
        assert!(DataType::Text.is_variable());
        assert!(!DataType::Uuid.is_variable());
    }
}
