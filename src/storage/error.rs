use std::path::PathBuf;

use super::{ConglomerateId, IndexEntry, RowPosition};
use crate::types::DataType;

/// Failure detected by the storage layer itself.
///
/// Raised through `eyre::bail!`, so it reaches callers as an `eyre::Report`
/// that can be downcast back to this type.
#[derive(Debug)]
pub enum StorageError {
    /// The conglomerate was dropped while a handle to it was still in use.
    Dropped { id: ConglomerateId },
    /// A row position does not address a record.
    InvalidPosition { id: ConglomerateId, position: RowPosition },
    /// A record failed its checksum.
    ChecksumMismatch { id: ConglomerateId, position: RowPosition },
    /// A file does not carry the expected header.
    BadHeader { path: PathBuf },
    /// The `(hash, position)` pair is already indexed.
    DuplicateEntry { id: ConglomerateId, entry: IndexEntry },
    /// A row does not match the template the row store was created with.
    SchemaMismatch {
        id: ConglomerateId,
        column: usize,
        expected: Option<DataType>,
        found: Option<DataType>,
    },
    /// A row has a different number of columns than the template.
    ArityMismatch {
        id: ConglomerateId,
        expected: usize,
        found: usize,
    },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Dropped { id } => write!(f, "{} has been dropped", id),
            StorageError::InvalidPosition { id, position } => {
                write!(f, "{}: no record at position {}", id, position.0)
            }
            StorageError::ChecksumMismatch { id, position } => {
                write!(f, "{}: checksum mismatch at position {}", id, position.0)
            }
            StorageError::BadHeader { path } => {
                write!(f, "bad conglomerate header in {:?}", path)
            }
            StorageError::DuplicateEntry { id, entry } => write!(
                f,
                "{}: duplicate index entry (hash {:#018x}, position {})",
                id, entry.hash, entry.position.0
            ),
            StorageError::SchemaMismatch {
                id,
                column,
                expected,
                found,
            } => write!(
                f,
                "{}: column {} expects {} but got {}",
                id,
                column,
                type_name(*expected),
                type_name(*found)
            ),
            StorageError::ArityMismatch {
                id,
                expected,
                found,
            } => write!(
                f,
                "{}: row has {} columns but template has {}",
                id, found, expected
            ),
        }
    }
}

fn type_name(dt: Option<DataType>) -> &'static str {
    dt.map(|d| d.name()).unwrap_or("ANY")
}

impl std::error::Error for StorageError {}
