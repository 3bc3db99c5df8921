//! # Spill Hash Table
//!
//! [`SpillHashTable`] groups rows by key in memory until its budget runs
//! out, then continues on disk. Callers see one get/put/remove/enumerate
//! contract and never learn which backend holds a key.
//!
//! ## States
//!
//! ```text
//!                first row the budget refuses
//!  NOT_SPILLED ─────────────────────────────────> SPILLED
//!   puts go to memory                              puts go to disk
//!                                                  (never reversed)
//! ```
//!
//! ## The Spill
//!
//! On the first refused row:
//!
//! 1. The overflow store is created, with that row as the column template.
//! 2. If the row's key is already in memory:
//!    - when duplicates are removed, the new row is dropped (the key is
//!      already taken);
//!    - otherwise the key's whole entry moves to disk, in order, and leaves
//!      memory.
//! 3. The row itself goes to disk.
//!
//! From then on no row is stored in memory. Keys resident at that moment
//! stay there until another row arrives for them, when step 2 applies to
//! that key. A key therefore lives entirely in one backend, and lookups
//! check memory first, then disk.
//!
//! ## Failure
//!
//! If the overflow store cannot be created, or a duplicate group fails to
//! move, the table is poisoned: every later call except [`close`] fails with
//! [`HashTableError::Unusable`]. Use after `close` is a caller bug, caught
//! by `debug_assert!` in debug builds.
//!
//! [`close`]: SpillHashTable::close

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{bail, Result};
use tracing::{debug, info, warn};

use super::memory_store::MemoryStore;
use super::overflow::OverflowStore;
use super::source::RowSource;
use super::stats::{BudgetSnapshot, RuntimeStats};
use super::store::{EntryIter, GroupStore};
use super::{Entry, HashKey, HashTableError};
use crate::storage::{Conglomerates, Retention};
use crate::types::{Row, RowLocation, Value};

/// Settings fixed when the table is built.
pub(super) struct TableConfig {
    pub key_columns: Vec<usize>,
    pub remove_duplicates: bool,
    pub skip_null_keys: bool,
    pub keep_row_locations: bool,
    pub retention: Retention,
    pub collect_statistics: bool,
    pub conglomerates: Arc<dyn Conglomerates>,
}

impl TableConfig {
    fn check_key_columns(&self, values: &[Value]) -> Result<()> {
        if let Some(&column) = self.key_columns.iter().find(|&&c| c >= values.len()) {
            bail!(HashTableError::KeyColumnOutOfRange {
                column,
                columns: values.len(),
            });
        }
        Ok(())
    }

    fn skips(&self, values: &[Value]) -> bool {
        self.skip_null_keys && self.key_columns.iter().any(|&c| values[c].is_null())
    }
}

/// Next row of `source` that is not skipped for a NULL key.
pub(super) fn next_source_row(
    source: &mut dyn RowSource,
    config: &TableConfig,
) -> Result<Option<Row>> {
    while let Some(next) = source.next_row()? {
        config.check_key_columns(next.values)?;
        if config.skips(next.values) {
            continue;
        }
        return Ok(Some(Row {
            values: next.values.to_vec(),
            location: next.location,
        }));
    }
    Ok(None)
}

pub struct SpillHashTable {
    config: TableConfig,
    memory: MemoryStore,
    overflow: Option<OverflowStore>,
    spilled: bool,
    poisoned: bool,
    closed: bool,
    auxiliary: BTreeMap<String, String>,
}

impl SpillHashTable {
    pub(super) fn new(config: TableConfig, memory: MemoryStore) -> Self {
        Self {
            config,
            memory,
            overflow: None,
            spilled: false,
            poisoned: false,
            closed: false,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn is_spilled(&self) -> bool {
        self.spilled
    }

    pub fn includes_row_locations(&self) -> bool {
        self.config.keep_row_locations
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.config.key_columns
    }

    pub fn removes_duplicates(&self) -> bool {
        self.config.remove_duplicates
    }

    /// Copies `values` into the table.
    ///
    /// Returns false if the row was not stored: a key column is NULL and
    /// NULL keys are skipped, or duplicates are removed and the key is taken.
    pub fn insert_values(
        &mut self,
        values: &[Value],
        location: Option<RowLocation>,
    ) -> Result<bool> {
        self.ensure_usable()?;
        self.config.check_key_columns(values)?;
        if self.config.skips(values) {
            return Ok(false);
        }
        self.put_checked(Row {
            values: values.to_vec(),
            location,
        })
    }

    /// Like [`insert_values`](Self::insert_values), taking ownership of the
    /// row.
    pub fn put(&mut self, row: Row) -> Result<bool> {
        self.ensure_usable()?;
        self.config.check_key_columns(&row.values)?;
        if self.config.skips(&row.values) {
            return Ok(false);
        }
        self.put_checked(row)
    }

    pub fn get(&mut self, key: &HashKey) -> Result<Option<Cow<'_, Entry>>> {
        self.ensure_usable()?;
        if let Some(found) = self.memory.try_get(key)? {
            return Ok(Some(found));
        }
        match self.overflow.as_mut() {
            Some(overflow) => overflow.try_get(key),
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Result<Option<Entry>> {
        self.ensure_usable()?;
        if let Some(found) = self.memory.remove(key)? {
            return Ok(Some(found));
        }
        match self.overflow.as_mut() {
            Some(overflow) => overflow.remove(key),
            None => Ok(None),
        }
    }

    /// Every stored entry: in-memory entries first, then rows read back from
    /// disk one at a time, each as [`Entry::Single`].
    pub fn elements(&mut self) -> Result<Elements<'_>> {
        self.ensure_usable()?;
        let memory = self.memory.entries();
        let inner: EntryIter<'_> = match self.overflow.as_mut() {
            Some(overflow) => Box::new(memory.chain(overflow.entries())),
            None => memory,
        };
        Ok(Elements { inner })
    }

    /// Number of distinct keys across both backends.
    pub fn size(&self) -> Result<u64> {
        self.ensure_usable()?;
        let on_disk = self.overflow.as_ref().map_or(0, GroupStore::key_count);
        Ok(self.memory.key_count() + on_disk)
    }

    /// Releases the in-memory map and drops the overflow store, if any.
    /// Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.memory.clear();

        let result = match self.overflow.take() {
            Some(mut overflow) => overflow.close(),
            None => Ok(()),
        };
        debug!(spilled = self.spilled, poisoned = self.poisoned, "closed hash table");
        result
    }

    #[cfg(test)]
    pub(super) fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn runtime_stats(&self) -> RuntimeStats {
        let budget = self.memory.budget();
        let budget = match budget.row_cap() {
            Some(cap) => BudgetSnapshot::RowCap(cap),
            None => BudgetSnapshot::RemainingBytes(budget.remaining_bytes().unwrap_or(0)),
        };
        RuntimeStats {
            keys_in_memory: self.memory.key_count(),
            rows_in_memory: self.memory.row_count(),
            max_bucket_rows: self.memory.max_bucket_rows(),
            spilled: self.spilled,
            keys_on_disk: self.overflow.as_ref().map_or(0, GroupStore::key_count),
            rows_written_to_disk: self.overflow.as_ref().map_or(0, OverflowStore::rows_written),
            budget,
            auxiliary: self.auxiliary.clone(),
        }
    }

    /// Attaches properties reported alongside [`runtime_stats`](Self::runtime_stats).
    pub fn set_auxiliary_stats(&mut self, stats: BTreeMap<String, String>) {
        self.auxiliary = stats;
    }

    pub fn auxiliary_stats(&self) -> &BTreeMap<String, String> {
        &self.auxiliary
    }

    /// Bulk load from a row source. Unlike [`put`](Self::put), no lookup is
    /// made first, so duplicates are only caught by the backend they land in.
    pub(super) fn load(&mut self, first: Option<Row>, source: &mut dyn RowSource) -> Result<()> {
        if let Some(row) = first {
            self.add_row(row)?;
        }
        while let Some(row) = next_source_row(source, &self.config)? {
            self.add_row(row)?;
        }
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        debug_assert!(!self.closed, "hash table used after close");
        if self.poisoned {
            bail!(HashTableError::Unusable);
        }
        Ok(())
    }

    fn put_checked(&mut self, row: Row) -> Result<bool> {
        let key = HashKey::from_row(&row.values, &self.config.key_columns);
        if self.config.remove_duplicates && self.get(&key)?.is_some() {
            return Ok(false);
        }
        self.add_row_with_key(key, row)
    }

    fn add_row(&mut self, row: Row) -> Result<bool> {
        let key = HashKey::from_row(&row.values, &self.config.key_columns);
        self.add_row_with_key(key, row)
    }

    fn add_row_with_key(&mut self, key: HashKey, mut row: Row) -> Result<bool> {
        if !self.config.keep_row_locations {
            row.location = None;
        }
        if self.overflow.is_none() {
            if self.memory.admits(&row) {
                return self.memory.put(key, row);
            }
            self.start_spill(&row)?;
        }
        self.put_spilled(key, row)
    }

    fn start_spill(&mut self, template: &Row) -> Result<()> {
        let created = OverflowStore::create(
            self.config.conglomerates.clone(),
            template,
            &self.config.key_columns,
            self.config.remove_duplicates,
            self.config.keep_row_locations,
            self.config.collect_statistics,
            self.config.retention,
        );
        let overflow = match created {
            Ok(overflow) => overflow,
            Err(e) => {
                self.poisoned = true;
                warn!(error = %e, "could not create overflow store, hash table unusable");
                return Err(e.wrap_err("hash table spill failed"));
            }
        };

        info!(
            keys_in_memory = self.memory.key_count(),
            rows_in_memory = self.memory.row_count(),
            remaining_bytes = ?self.memory.budget().remaining_bytes(),
            "hash table spilling to disk"
        );
        self.spilled = true;
        self.overflow = Some(overflow);
        Ok(())
    }

    /// Stores a row once spilled. A key still resident in memory first moves
    /// there in full, so its rows never straddle both backends.
    fn put_spilled(&mut self, key: HashKey, row: Row) -> Result<bool> {
        let Some(overflow) = self.overflow.as_mut() else {
            bail!(HashTableError::Unusable);
        };

        if self.memory.contains_key(&key) {
            if self.config.remove_duplicates {
                return Ok(false);
            }
            if let Some(existing) = self.memory.remove(&key)? {
                let migrated = existing.len();
                for moved in existing.into_rows() {
                    if let Err(e) = overflow.put(key.clone(), moved) {
                        self.poisoned = true;
                        warn!(error = %e, "could not move duplicate group to disk, hash table unusable");
                        return Err(e.wrap_err("hash table spill failed"));
                    }
                }
                debug!(migrated, "moved duplicate group to disk");
            }
        }

        overflow.put(key, row)
    }
}

/// Single-pass sequence over every entry of a [`SpillHashTable`].
pub struct Elements<'a> {
    inner: EntryIter<'a>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<Cow<'a, Entry>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashtable::{HashTableBuilder, VecRowSource};
    use crate::row;
    use crate::storage::TempSpace;
    use tempfile::tempdir;

    fn get(table: &mut SpillHashTable, key: i64) -> Option<Entry> {
        table
            .get(&HashKey::from(key))
            .unwrap()
            .map(Cow::into_owned)
    }

    #[test]
    fn spill_moves_triggering_key_group() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .max_in_memory_rows(2)
            .build()
            .unwrap();

        table.put(row![1, "a"]).unwrap();
        table.put(row![1, "b"]).unwrap();
        assert!(!table.is_spilled());

        table.put(row![1, "c"]).unwrap();
        assert!(table.is_spilled());

        let stats = table.runtime_stats();
        assert_eq!(stats.keys_in_memory, 0);
        assert_eq!(stats.rows_written_to_disk, 3);
        assert_eq!(
            get(&mut table, 1),
            Some(Entry::Group(vec![row![1, "a"], row![1, "b"], row![1, "c"]]))
        );
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn resident_keys_move_on_next_row() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .max_in_memory_rows(2)
            .build()
            .unwrap();

        table.put(row![1, "a"]).unwrap();
        table.put(row![2, "b"]).unwrap();
        table.put(row![3, "c"]).unwrap();
        assert_eq!(table.runtime_stats().keys_in_memory, 2);

        // a later row for a resident key pulls that key's rows to disk
        table.put(row![1, "d"]).unwrap();

        let stats = table.runtime_stats();
        assert!(stats.spilled);
        assert_eq!(stats.keys_in_memory, 1);
        assert_eq!(stats.rows_written_to_disk, 3);
        assert_eq!(stats.budget, BudgetSnapshot::RowCap(2));
        assert_eq!(
            get(&mut table, 1),
            Some(Entry::Group(vec![row![1, "a"], row![1, "d"]]))
        );
        assert_eq!(get(&mut table, 2), Some(Entry::Single(row![2, "b"])));
        assert_eq!(table.size().unwrap(), 3);
    }

    #[test]
    fn duplicate_trigger_is_dropped_when_removing_duplicates() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut source = VecRowSource::new(vec![row![1, "a"], row![1, "b"]]);
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .source(&mut source)
            .remove_duplicates(true)
            .max_in_memory_rows(1)
            .build()
            .unwrap();

        assert!(table.is_spilled());
        assert_eq!(get(&mut table, 1), Some(Entry::Single(row![1, "a"])));
        assert_eq!(table.runtime_stats().rows_written_to_disk, 0);
    }

    #[test]
    fn null_keys_are_skipped() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0, 1])
            .skip_null_keys(true)
            .build()
            .unwrap();

        assert!(!table
            .insert_values(&[Value::Int(1), Value::Null], None)
            .unwrap());
        assert!(table
            .insert_values(&[Value::Int(1), Value::Int(2)], None)
            .unwrap());
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn short_row_is_rejected() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![3])
            .build()
            .unwrap();
        let err = table.put(row![1]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<HashTableError>(),
            Some(&HashTableError::KeyColumnOutOfRange {
                column: 3,
                columns: 1
            })
        );
    }

    #[test]
    fn locations_dropped_unless_kept() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .build()
            .unwrap();
        table
            .insert_values(&[Value::Int(1)], Some(RowLocation(9)))
            .unwrap();
        assert!(!table.includes_row_locations());
        assert_eq!(get(&mut table, 1), Some(Entry::Single(row![1])));
    }

    #[test]
    fn auxiliary_stats_are_reported() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .build()
            .unwrap();
        let mut aux = BTreeMap::new();
        aux.insert("operator".to_string(), "hash join".to_string());
        table.set_auxiliary_stats(aux.clone());

        assert_eq!(table.auxiliary_stats(), &aux);
        assert_eq!(table.runtime_stats().auxiliary, aux);
        assert!(table
            .runtime_stats()
            .to_string()
            .contains("operator: hash join"));
    }

    #[test]
    fn close_is_idempotent_and_drops_overflow() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space.clone(), vec![0])
            .max_in_memory_rows(0)
            .build()
            .unwrap();
        table.put(row![1]).unwrap();
        assert!(table.is_spilled());
        assert_eq!(space.live_conglomerates().len(), 2);

        table.close().unwrap();
        table.close().unwrap();
        assert!(space.live_conglomerates().is_empty());
    }
}
