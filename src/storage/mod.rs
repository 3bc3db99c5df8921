//! # Overflow Storage Primitives
//!
//! This module provides the persistent structures an overflow store is built
//! from. Two kinds of conglomerate exist:
//!
//! - **Row store** ([`RowStore`], implemented by [`HeapFile`]): append-only
//!   rows addressed by position, with fetch, delete and a forward scan.
//! - **Hash index** ([`HashIndex`], implemented by [`RunIndex`]): a unique,
//!   ordered set of `(hash, position)` entries that can be positioned with
//!   greater-or-equal / strictly-greater bounds against a hash value.
//!
//! Both are created, tracked and dropped by a [`Conglomerates`] factory.
//! [`TempSpace`] is the directory-backed factory; it also models the end of
//! the enclosing transaction, dropping whatever was not created to outlive a
//! commit.
//!
//! ## File Layout
//!
//! ```text
//! temp_space_dir/
//! ├── 000001.heap     # row store: [header][record]*
//! └── 000002.idx      # hash index: [header][run]*
//!
//! record := [flags: u8] [len: u32] [crc32: u32] [row bytes]
//! run    := [(hash: u64, position: u64)]*   sorted by (hash, position)
//! ```
//!
//! ## Locking
//!
//! None. A conglomerate handle has exactly one owner and every method takes
//! `&mut self`; exclusivity comes from the borrow checker rather than from
//! lock modes.
//!
//! ## Error Handling
//!
//! Every failure surfaces as an `eyre::Report`. Conditions the layer detects
//! itself are raised as [`StorageError`] so callers can `downcast_ref` them.

mod error;
mod hash_index;
mod heap;
pub mod row_codec;
mod temp_space;

pub use error::StorageError;
pub use hash_index::RunIndex;
pub use heap::HeapFile;
pub use temp_space::{Outcome, TempSpace};

use eyre::Result;

use crate::types::Value;

/// Identifier of one conglomerate within its factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConglomerateId(pub u64);

impl std::fmt::Display for ConglomerateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conglomerate#{}", self.0)
    }
}

/// Position of a row within a row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowPosition(pub u64);

/// Whether a conglomerate survives the commit of the enclosing transaction.
///
/// A rollback drops every temporary conglomerate regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    DropAtCommit,
    KeepAfterCommit,
}

/// Entry of a hash index: a key hash and the row position it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexEntry {
    pub hash: u64,
    pub position: RowPosition,
}

/// Positioning operator for index scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    /// Greater-or-equal.
    Ge,
    /// Strictly greater.
    Gt,
}

/// One end of an index scan range.
///
/// As a start bound, the scan begins at the first entry whose hash satisfies
/// `op` against `hash`. As a stop bound, the scan ends at the first entry whose
/// hash satisfies it. An equality probe on `h` is therefore
/// `start = (Ge, h), stop = (Gt, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBound {
    pub op: ScanOp,
    pub hash: u64,
}

impl ScanBound {
    pub fn ge(hash: u64) -> Self {
        Self {
            op: ScanOp::Ge,
            hash,
        }
    }

    pub fn gt(hash: u64) -> Self {
        Self {
            op: ScanOp::Gt,
            hash,
        }
    }

    /// True if `hash` lies at or past this bound.
    pub fn reached_by(&self, hash: u64) -> bool {
        match self.op {
            ScanOp::Ge => hash >= self.hash,
            ScanOp::Gt => hash > self.hash,
        }
    }
}

/// A row read back by a forward scan, with the position to resume from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    pub position: RowPosition,
    pub next: RowPosition,
    pub values: Vec<Value>,
}

/// Appendable store of rows addressed by position.
pub trait RowStore {
    fn id(&self) -> ConglomerateId;

    /// Appends a row and returns its position.
    fn append(&mut self, values: &[Value]) -> Result<RowPosition>;

    /// Reads the row at `position`, `None` if it was deleted.
    fn fetch(&mut self, position: RowPosition) -> Result<Option<Vec<Value>>>;

    /// Deletes the row at `position`. Returns false if it was already deleted.
    fn delete(&mut self, position: RowPosition) -> Result<bool>;

    /// Position of the first row slot.
    fn first_position(&self) -> RowPosition;

    /// First live row at or after `from`, in position order.
    fn next_live(&mut self, from: RowPosition) -> Result<Option<ScannedRow>>;

    /// Number of rows appended and not deleted.
    fn live_rows(&self) -> u64;
}

/// Unique ordered index over `(hash, position)` pairs.
pub trait HashIndex {
    fn id(&self) -> ConglomerateId;

    /// Inserts `entry`. Fails with [`StorageError::DuplicateEntry`] if the
    /// pair is already present.
    fn insert(&mut self, entry: IndexEntry) -> Result<()>;

    /// Entries from `start` up to (not including) `stop`, ordered by
    /// `(hash, position)`.
    fn scan(&mut self, start: ScanBound, stop: ScanBound) -> Result<Vec<IndexEntry>>;

    /// Offers entries from `start` up to `stop` to `visit`, in no particular
    /// order, and stops at the first one it accepts. Returns true if an
    /// entry was accepted.
    fn find(
        &mut self,
        start: ScanBound,
        stop: ScanBound,
        visit: &mut dyn FnMut(IndexEntry) -> Result<bool>,
    ) -> Result<bool> {
        for entry in self.scan(start, stop)? {
            if visit(entry)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Removes `entry`. Returns false if it was not present.
    fn delete(&mut self, entry: IndexEntry) -> Result<bool>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Factory that creates, tracks and drops conglomerates.
pub trait Conglomerates {
    /// Creates a row store whose column types are fixed by `template`.
    fn create_row_store(
        &self,
        template: &[Value],
        retention: Retention,
    ) -> Result<Box<dyn RowStore>>;

    fn create_hash_index(&self, retention: Retention) -> Result<Box<dyn HashIndex>>;

    /// Drops a conglomerate. Any handle still open on it fails from then on.
    fn drop_conglomerate(&self, id: ConglomerateId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_probe_bounds() {
        let start = ScanBound::ge(10);
        let stop = ScanBound::gt(10);
        assert!(!start.reached_by(9));
        assert!(start.reached_by(10));
        assert!(!stop.reached_by(10));
        assert!(stop.reached_by(11));
    }
}
