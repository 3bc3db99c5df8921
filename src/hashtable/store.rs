use std::borrow::Cow;

use eyre::Result;

use super::{Entry, HashKey};
use crate::types::Row;

/// Lazily produced sequence of entries. In-memory entries are borrowed, rows
/// read back from disk are owned.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Cow<'a, Entry>>> + 'a>;

/// The get/put/remove/enumerate contract shared by the in-memory and the
/// overflow backends of a [`SpillHashTable`](super::SpillHashTable).
pub trait GroupStore {
    /// Everything stored under `key`, `None` if the key is absent.
    fn try_get(&mut self, key: &HashKey) -> Result<Option<Cow<'_, Entry>>>;

    /// Stores `row` under `key`. Returns false if the row was rejected as a
    /// duplicate.
    fn put(&mut self, key: HashKey, row: Row) -> Result<bool>;

    /// Removes and returns everything stored under `key`.
    fn remove(&mut self, key: &HashKey) -> Result<Option<Entry>>;

    /// Number of distinct keys held.
    fn key_count(&self) -> u64;

    fn entries(&mut self) -> EntryIter<'_>;
}
