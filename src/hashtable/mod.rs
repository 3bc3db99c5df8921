//! # Hash Grouping With Disk Overflow
//!
//! This module builds the structure a query executor materializes for hash
//! joins, DISTINCT and GROUP BY: a map from key to the row, or rows, sharing
//! that key, bounded in memory and spilling to disk once its budget is
//! spent.
//!
//! ## Components
//!
//! ```text
//!            row
//!             │
//!             ▼
//!     ┌──────────────┐    HashKey   ┌─────────────────────────────────┐
//!     │  key builder │ ───────────> │        SpillHashTable           │
//!     └──────────────┘              │  (facade + spill controller)    │
//!                                   └────────┬───────────────┬────────┘
//!                                            │ GroupStore    │ GroupStore
//!                                            ▼               ▼
//!                                   ┌──────────────┐ ┌──────────────────┐
//!                                   │ MemoryStore  │ │  OverflowStore   │
//!                                   │ hashbrown map│ │ HeapFile+RunIndex│
//!                                   │ + SpillBudget│ │ (after spill)    │
//!                                   └──────────────┘ └──────────────────┘
//! ```
//!
//! | Type | Role |
//! |------|------|
//! | [`HashKey`] | one key value, or a composite of several |
//! | [`Entry`] | `Single(row)` or an ordered `Group` of duplicates |
//! | [`GroupStore`] | get/put/remove/enumerate contract of one backend |
//! | [`SpillHashTable`] | routes rows between backends, owns the spill |
//! | [`HashTableBuilder`] | collects options, loads a [`RowSource`] |
//!
//! ## Invariants
//!
//! - A key's rows are all in memory or all on disk.
//! - With duplicate removal on, a key keeps its first row only.
//! - With NULL-key skipping on, a row with any NULL key column is never
//!   stored or counted.
//! - `size()` is the number of distinct keys in memory plus on disk.
//!
//! ## Concurrency
//!
//! A table belongs to one thread of control. Nothing inside it locks; every
//! mutating call takes `&mut self`.

mod builder;
mod entry;
mod error;
mod key;
mod memory_store;
mod overflow;
mod source;
mod stats;
mod store;
mod table;

pub use builder::HashTableBuilder;
pub use entry::Entry;
pub use error::HashTableError;
pub use key::HashKey;
pub use memory_store::MemoryStore;
pub use overflow::{OverflowRows, OverflowStore};
pub use source::{RowSource, SourceRow, VecRowSource};
pub use stats::{BudgetSnapshot, RuntimeStats};
pub use store::{EntryIter, GroupStore};
pub use table::{Elements, SpillHashTable};
