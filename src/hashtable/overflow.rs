//! # Overflow Store
//!
//! Disk-resident backend created on the first spill. It emulates the
//! in-memory map with two conglomerates:
//!
//! ```text
//!   HashKey ──hash_code()──> RunIndex                     HeapFile
//!                            (hash, position) ─────────>  position: row
//!                            (hash, position) ─────────>  position: row
//! ```
//!
//! The index stores only the hash. A lookup scans the equal-hash range
//! `[Ge h, Gt h)`, fetches every candidate row and keeps those whose key
//! columns actually equal the probe key, so colliding keys sharing one hash
//! bucket are told apart by value.
//!
//! ## Row Layout
//!
//! Disk rows are flat value arrays shaped by the template row given at
//! creation. When the table keeps row locations, one trailing `Int` column
//! holds the location (NULL if the row had none) and is folded back into
//! [`Row::location`] on the way out.
//!
//! ## Key Count
//!
//! `put` probes for the key before appending when duplicates are removed or
//! statistics are collected. The probe stops at the first live row with the
//! key. Without it every insert counts as a new key and removing a key
//! subtracts one, so the count is exact only when probing is on.
//!
//! ## Enumeration
//!
//! A forward scan of the row store in position order, independent of the
//! index. [`OverflowRows::position`] is where the scan would continue, and
//! [`OverflowStore::rows_from`] restarts a scan there.

use std::borrow::Cow;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::{debug, warn};

use super::store::{EntryIter, GroupStore};
use super::{Entry, HashKey};
use crate::storage::{
    ConglomerateId, Conglomerates, HashIndex, IndexEntry, Retention, RowPosition, RowStore,
    ScanBound, StorageError,
};
use crate::types::{Row, RowLocation, Value};

pub struct OverflowStore {
    conglomerates: Arc<dyn Conglomerates>,
    rows: Box<dyn RowStore>,
    index: Box<dyn HashIndex>,
    key_columns: Vec<usize>,
    remove_duplicates: bool,
    keep_locations: bool,
    probe_on_put: bool,
    key_count: u64,
    rows_written: u64,
    closed: bool,
}

struct Candidate {
    entry: IndexEntry,
    row: Row,
}

impl OverflowStore {
    pub fn create(
        conglomerates: Arc<dyn Conglomerates>,
        template: &Row,
        key_columns: &[usize],
        remove_duplicates: bool,
        keep_locations: bool,
        collect_statistics: bool,
        retention: Retention,
    ) -> Result<Self> {
        let mut columns = template.values.clone();
        if keep_locations {
            columns.push(Value::Int(0));
        }

        let rows = conglomerates
            .create_row_store(&columns, retention)
            .wrap_err("failed to create overflow row store")?;
        let index = match conglomerates.create_hash_index(retention) {
            Ok(index) => index,
            Err(e) => {
                if let Err(drop_err) = conglomerates.drop_conglomerate(rows.id()) {
                    warn!(conglomerate = %rows.id(), error = %drop_err, "failed to drop orphaned row store");
                }
                return Err(e.wrap_err("failed to create overflow hash index"));
            }
        };

        debug!(
            rows = %rows.id(),
            index = %index.id(),
            columns = columns.len(),
            ?retention,
            "created overflow store"
        );

        Ok(Self {
            conglomerates,
            rows,
            index,
            key_columns: key_columns.to_vec(),
            remove_duplicates,
            keep_locations,
            probe_on_put: remove_duplicates || collect_statistics,
            key_count: 0,
            rows_written: 0,
            closed: false,
        })
    }

    fn drop_quietly(&self, id: ConglomerateId) -> Result<()> {
        match self.conglomerates.drop_conglomerate(id) {
            Err(e) if !already_dropped(&e) => Err(e),
            _ => Ok(()),
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn flatten<'r>(&self, row: &'r Row) -> Cow<'r, [Value]> {
        if !self.keep_locations {
            return Cow::Borrowed(&row.values);
        }
        let mut values = Vec::with_capacity(row.values.len() + 1);
        values.extend_from_slice(&row.values);
        values.push(match row.location {
            Some(RowLocation(loc)) => Value::Int(loc as i64),
            None => Value::Null,
        });
        Cow::Owned(values)
    }

    fn unflatten(&self, mut values: Vec<Value>) -> Row {
        if !self.keep_locations {
            return Row::new(values);
        }
        let location = match values.pop() {
            Some(Value::Int(loc)) => Some(RowLocation(loc as u64)),
            _ => None,
        };
        Row { values, location }
    }

    /// Rows in the hash bucket of `key` whose key columns equal `key`, in
    /// index order.
    fn candidates(&mut self, key: &HashKey) -> Result<Vec<Candidate>> {
        let hash = key.hash_code();
        let entries = self.index.scan(ScanBound::ge(hash), ScanBound::gt(hash))?;

        let mut found = Vec::new();
        for entry in entries {
            let values = match self.rows.fetch(entry.position)? {
                Some(values) => values,
                None => continue,
            };
            if key.matches(&values, &self.key_columns) {
                found.push(Candidate {
                    entry,
                    row: self.unflatten(values),
                });
            }
        }
        Ok(found)
    }

    /// True if some live row carries `key`. Stops at the first match, so a
    /// key with many rows costs one fetch.
    fn contains(&mut self, key: &HashKey) -> Result<bool> {
        let hash = key.hash_code();
        let rows = &mut self.rows;
        let key_columns = &self.key_columns;
        self.index
            .find(ScanBound::ge(hash), ScanBound::gt(hash), &mut |entry| {
                Ok(match rows.fetch(entry.position)? {
                    Some(values) => key.matches(&values, key_columns),
                    None => false,
                })
            })
    }

    /// Scans live rows starting at `position`.
    pub fn rows_from(&mut self, position: RowPosition) -> OverflowRows<'_> {
        OverflowRows {
            store: self,
            next: Some(position),
        }
    }

    pub fn first_position(&self) -> RowPosition {
        self.rows.first_position()
    }

    /// Drops both conglomerates. Safe to call more than once, and after the
    /// storage layer already dropped them at the end of a transaction.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let rows = self.drop_quietly(self.rows.id());
        let index = self.drop_quietly(self.index.id());
        debug!(
            rows = %self.rows.id(),
            index = %self.index.id(),
            keys = self.key_count,
            rows_written = self.rows_written,
            "closed overflow store"
        );
        rows.and(index)
    }
}

fn already_dropped(err: &eyre::Report) -> bool {
    matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::Dropped { .. })
    )
}

impl GroupStore for OverflowStore {
    fn try_get(&mut self, key: &HashKey) -> Result<Option<Cow<'_, Entry>>> {
        debug_assert!(!self.closed, "overflow store used after close");
        let rows = self.candidates(key)?.into_iter().map(|c| c.row).collect();
        Ok(Entry::from_rows(rows).map(Cow::Owned))
    }

    fn put(&mut self, key: HashKey, row: Row) -> Result<bool> {
        debug_assert!(!self.closed, "overflow store used after close");
        let exists = self.probe_on_put && self.contains(&key)?;
        if exists && self.remove_duplicates {
            return Ok(false);
        }

        let flat = self.flatten(&row);
        let position = self.rows.append(&flat)?;
        self.index.insert(IndexEntry {
            hash: key.hash_code(),
            position,
        })?;

        self.rows_written += 1;
        if !exists {
            self.key_count += 1;
        }
        Ok(true)
    }

    fn remove(&mut self, key: &HashKey) -> Result<Option<Entry>> {
        debug_assert!(!self.closed, "overflow store used after close");
        let found = self.candidates(key)?;
        if found.is_empty() {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(found.len());
        for Candidate { entry, row } in found {
            self.rows.delete(entry.position)?;
            self.index.delete(entry)?;
            rows.push(row);
        }
        self.key_count = self.key_count.saturating_sub(1);
        Ok(Entry::from_rows(rows))
    }

    fn key_count(&self) -> u64 {
        self.key_count
    }

    fn entries(&mut self) -> EntryIter<'_> {
        let first = self.first_position();
        Box::new(
            self.rows_from(first)
                .map(|row| row.map(|row| Cow::Owned(Entry::Single(row)))),
        )
    }
}

/// Forward scan over the live rows of an overflow store.
pub struct OverflowRows<'a> {
    store: &'a mut OverflowStore,
    next: Option<RowPosition>,
}

impl OverflowRows<'_> {
    /// Where the scan continues, `None` once it has ended.
    pub fn position(&self) -> Option<RowPosition> {
        self.next
    }
}

impl Iterator for OverflowRows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        match self.store.rows.next_live(from) {
            Ok(Some(scanned)) => {
                self.next = Some(scanned.next);
                Some(Ok(self.store.unflatten(scanned.values)))
            }
            Ok(None) => {
                self.next = None;
                None
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}
