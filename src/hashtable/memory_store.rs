//! In-memory backend: a hash map from key to [`Entry`] charged against a
//! [`SpillBudget`].
//!
//! | Existing entry | Duplicates kept          | Duplicates removed |
//! |----------------|--------------------------|--------------------|
//! | none           | store `Single`, charge   | store `Single`, charge |
//! | `Single`       | promote to `Group`, charge row + group overhead | reject |
//! | `Group`        | append, charge row       | (cannot exist)     |
//!
//! Admission is not decided here. The table asks [`MemoryStore::admits`]
//! before calling `put` and spills instead when the answer is no.

use std::borrow::Cow;

use eyre::Result;
use hashbrown::hash_map::Entry as MapEntry;
use hashbrown::HashMap;

use super::store::{EntryIter, GroupStore};
use super::{Entry, HashKey};
use crate::config::MAX_INITIAL_RESERVATION;
use crate::memory::SpillBudget;
use crate::types::Row;

pub struct MemoryStore {
    map: HashMap<HashKey, Entry>,
    budget: SpillBudget,
    remove_duplicates: bool,
}

impl MemoryStore {
    /// `capacity` and `load_factor` size the map so that
    /// `capacity * load_factor` keys fit before it grows, up to
    /// [`MAX_INITIAL_RESERVATION`].
    pub fn new(
        budget: SpillBudget,
        capacity: usize,
        load_factor: f32,
        remove_duplicates: bool,
    ) -> Self {
        let reserve = ((capacity as f64) * f64::from(load_factor))
            .ceil()
            .clamp(1.0, MAX_INITIAL_RESERVATION as f64) as usize;
        Self {
            map: HashMap::with_capacity(reserve),
            budget,
            remove_duplicates,
        }
    }

    pub fn admits(&self, row: &Row) -> bool {
        self.budget.admits(row)
    }

    pub fn budget(&self) -> &SpillBudget {
        &self.budget
    }

    pub fn contains_key(&self, key: &HashKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn row_count(&self) -> usize {
        self.map.values().map(Entry::len).sum()
    }

    pub fn max_bucket_rows(&self) -> usize {
        self.map.values().map(Entry::len).max().unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    pub fn clear(&mut self) {
        self.map = HashMap::new();
    }
}

impl GroupStore for MemoryStore {
    fn try_get(&mut self, key: &HashKey) -> Result<Option<Cow<'_, Entry>>> {
        Ok(self.map.get(key).map(Cow::Borrowed))
    }

    fn put(&mut self, key: HashKey, row: Row) -> Result<bool> {
        match self.map.entry(key) {
            MapEntry::Vacant(slot) => {
                self.budget.charge(&row, false);
                slot.insert(Entry::Single(row));
                Ok(true)
            }
            MapEntry::Occupied(_) if self.remove_duplicates => Ok(false),
            MapEntry::Occupied(mut slot) => {
                let first_duplicate = !slot.get().is_group();
                self.budget.charge(&row, first_duplicate);
                slot.get_mut().push(row);
                Ok(true)
            }
        }
    }

    fn remove(&mut self, key: &HashKey) -> Result<Option<Entry>> {
        Ok(self.map.remove(key))
    }

    fn key_count(&self) -> u64 {
        self.map.len() as u64
    }

    fn entries(&mut self) -> EntryIter<'_> {
        Box::new(self.map.values().map(|entry| Ok(Cow::Borrowed(entry))))
    }
}
