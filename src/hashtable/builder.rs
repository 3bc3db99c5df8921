//! Fluent construction of a [`SpillHashTable`].
//!
//! ```ignore
//! let space = TempSpace::new_temp()?;
//! let mut source = VecRowSource::new(rows);
//! let table = HashTableBuilder::new(space, vec![0])
//!     .source(&mut source)
//!     .remove_duplicates(true)
//!     .max_in_memory_rows(10_000)
//!     .build()?;
//! ```
//!
//! ## Initial Capacity
//!
//! | Given                          | Capacity                                 |
//! |--------------------------------|------------------------------------------|
//! | `initial_capacity`             | as given, scaled by `load_factor`        |
//! | `estimated_rows`, row cap      | `min(estimate, cap)`                     |
//! | `estimated_rows`, byte budget  | `min(estimate, budget / first row size)` |
//! | neither                        | `DEFAULT_INITIAL_CAPACITY`               |
//!
//! The first row is read from the source before the map exists so its size
//! can inform the estimate. It is then loaded like any other row.

use std::sync::Arc;

use eyre::{ensure, Result};

use super::memory_store::MemoryStore;
use super::source::RowSource;
use super::table::{next_source_row, SpillHashTable, TableConfig};
use crate::config::{DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR};
use crate::memory::{MemoryProbe, SpillBudget, SystemMemory};
use crate::storage::{Conglomerates, Retention};

pub struct HashTableBuilder<'a> {
    conglomerates: Arc<dyn Conglomerates>,
    key_columns: Vec<usize>,
    source: Option<&'a mut dyn RowSource>,
    remove_duplicates: bool,
    skip_null_keys: bool,
    estimated_rows: Option<usize>,
    max_in_memory_rows: Option<usize>,
    initial_capacity: Option<usize>,
    load_factor: Option<f32>,
    keep_after_commit: bool,
    keep_row_locations: bool,
    collect_statistics: bool,
    memory_probe: Box<dyn MemoryProbe>,
}

impl<'a> HashTableBuilder<'a> {
    pub fn new(conglomerates: Arc<dyn Conglomerates>, key_columns: Vec<usize>) -> Self {
        Self {
            conglomerates,
            key_columns,
            source: None,
            remove_duplicates: false,
            skip_null_keys: false,
            estimated_rows: None,
            max_in_memory_rows: None,
            initial_capacity: None,
            load_factor: None,
            keep_after_commit: false,
            keep_row_locations: false,
            collect_statistics: true,
            memory_probe: Box::new(SystemMemory),
        }
    }

    /// Rows loaded by `build`.
    pub fn source(mut self, source: &'a mut dyn RowSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn remove_duplicates(mut self, yes: bool) -> Self {
        self.remove_duplicates = yes;
        self
    }

    pub fn skip_null_keys(mut self, yes: bool) -> Self {
        self.skip_null_keys = yes;
        self
    }

    /// Expected number of rows, used only to size the map.
    pub fn estimated_rows(mut self, rows: usize) -> Self {
        self.estimated_rows = Some(rows);
        self
    }

    /// Hard cap on rows kept in memory. Without one, the budget is a share
    /// of the memory the probe reports at build time.
    pub fn max_in_memory_rows(mut self, rows: usize) -> Self {
        self.max_in_memory_rows = Some(rows);
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = Some(load_factor);
        self
    }

    /// Keep the overflow store past the commit of the enclosing transaction.
    pub fn keep_after_commit(mut self, yes: bool) -> Self {
        self.keep_after_commit = yes;
        self
    }

    pub fn keep_row_locations(mut self, yes: bool) -> Self {
        self.keep_row_locations = yes;
        self
    }

    /// Probe the overflow store for the key before every disk insert so
    /// the on-disk key count stays exact. On by default.
    pub fn collect_statistics(mut self, yes: bool) -> Self {
        self.collect_statistics = yes;
        self
    }

    pub fn memory_probe<P: MemoryProbe + 'static>(mut self, probe: P) -> Self {
        self.memory_probe = Box::new(probe);
        self
    }

    pub fn build(self) -> Result<SpillHashTable> {
        ensure!(
            !self.key_columns.is_empty(),
            "a hash table needs at least one key column"
        );
        let load_factor = self.load_factor.unwrap_or(DEFAULT_LOAD_FACTOR);
        ensure!(
            load_factor > 0.0 && load_factor.is_finite(),
            "load factor must be positive, got {}",
            load_factor
        );

        let budget = match self.max_in_memory_rows {
            Some(rows) => SpillBudget::row_limit(rows),
            None => SpillBudget::from_probe(self.memory_probe.as_ref()),
        };

        let config = TableConfig {
            key_columns: self.key_columns,
            remove_duplicates: self.remove_duplicates,
            skip_null_keys: self.skip_null_keys,
            keep_row_locations: self.keep_row_locations,
            retention: if self.keep_after_commit {
                Retention::KeepAfterCommit
            } else {
                Retention::DropAtCommit
            },
            collect_statistics: self.collect_statistics,
            conglomerates: self.conglomerates,
        };

        let mut source = self.source;
        let first = match source.as_deref_mut() {
            Some(source) if self.initial_capacity.is_none() => {
                next_source_row(source, &config)?
            }
            _ => None,
        };

        let capacity = match (self.initial_capacity, self.estimated_rows) {
            (Some(capacity), _) => capacity,
            (None, Some(estimate)) => budget.capacity_hint(estimate, first.as_ref()),
            (None, None) => DEFAULT_INITIAL_CAPACITY,
        };
        let memory = MemoryStore::new(budget, capacity, load_factor, config.remove_duplicates);

        let mut table = SpillHashTable::new(config, memory);
        if let Some(source) = source {
            table.load(first, source)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashtable::{Entry, HashKey, VecRowSource};
    use crate::memory::FixedMemory;
    use crate::row;
    use crate::storage::TempSpace;
    use crate::types::{Row, Value};
    use tempfile::tempdir;

    #[test]
    fn empty_key_columns_rejected() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        assert!(HashTableBuilder::new(space, vec![]).build().is_err());
    }

    #[test]
    fn bad_load_factor_rejected() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        assert!(HashTableBuilder::new(space, vec![0])
            .load_factor(0.0)
            .build()
            .is_err());
    }

    #[test]
    fn source_rows_are_loaded_skipping_null_keys() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut source = VecRowSource::new(vec![
            Row::new(vec![Value::Null, Value::from("skipped")]),
            row![1, "a"],
            row![2, "b"],
        ]);
        let mut table = HashTableBuilder::new(space, vec![0])
            .source(&mut source)
            .skip_null_keys(true)
            .estimated_rows(3)
            .build()
            .unwrap();

        assert_eq!(table.size().unwrap(), 2);
        assert_eq!(
            table.get(&HashKey::from(1i64)).unwrap().unwrap().into_owned(),
            Entry::Single(row![1, "a"])
        );
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn fixed_memory_probe_sets_byte_budget() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut table = HashTableBuilder::new(space, vec![0])
            .memory_probe(FixedMemory(0))
            .build()
            .unwrap();

        table.put(row![1, "a"]).unwrap();
        assert!(table.is_spilled());
    }

    #[test]
    fn estimate_is_capped_by_row_limit() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let table = HashTableBuilder::new(space, vec![0])
            .estimated_rows(1_000_000)
            .max_in_memory_rows(8)
            .build()
            .unwrap();
        assert!(table.memory_capacity() >= 6);
        assert!(table.memory_capacity() < 1_000);
    }

    #[test]
    fn explicit_capacity_and_load_factor_win() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut source = VecRowSource::new(vec![row![1, "a"], row![2, "b"], row![1, "c"]]);
        let mut table = HashTableBuilder::new(space, vec![0])
            .source(&mut source)
            .estimated_rows(1_000_000)
            .max_in_memory_rows(4)
            .initial_capacity(64)
            .load_factor(0.5)
            .build()
            .unwrap();

        // 64 * 0.5 keys reserved; the estimate would have sized for 4 rows
        assert!(table.memory_capacity() >= 32);
        assert!(table.memory_capacity() < 64);

        assert_eq!(source.remaining(), 0);
        assert_eq!(table.size().unwrap(), 2);
        assert_eq!(
            table.get(&HashKey::from(1i64)).unwrap().unwrap().into_owned(),
            Entry::Group(vec![row![1, "a"], row![1, "c"]])
        );
        assert!(!table.is_spilled());
    }
}
