/// Misuse or failure state of a [`SpillHashTable`](super::SpillHashTable)
/// itself, as opposed to errors bubbling up from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashTableError {
    /// A spill failed part way. Only `close` may still be called.
    Unusable,
    /// A row is too short for the configured key columns.
    KeyColumnOutOfRange { column: usize, columns: usize },
}

impl std::fmt::Display for HashTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashTableError::Unusable => {
                write!(f, "hash table is unusable after a failed spill and must be closed")
            }
            HashTableError::KeyColumnOutOfRange { column, columns } => write!(
                f,
                "key column {} out of range for a row of {} columns",
                column, columns
            ),
        }
    }
}

impl std::error::Error for HashTableError {}
