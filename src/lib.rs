//! # hashspill - Memory-Bounded Hash Grouping
//!
//! hashspill is the hash-grouping engine behind hash joins, DISTINCT and
//! GROUP BY in a relational executor. It maps keys to the rows sharing them,
//! keeps that map in memory while a budget allows, and transparently
//! continues in disk-backed overflow storage once it does not.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hashspill::{HashKey, HashTableBuilder, TempSpace, VecRowSource};
//!
//! let space = TempSpace::new_temp()?;
//! let mut source = VecRowSource::new(rows);
//!
//! let mut table = HashTableBuilder::new(space.clone(), vec![0])
//!     .source(&mut source)
//!     .max_in_memory_rows(100_000)
//!     .build()?;
//!
//! if let Some(entry) = table.get(&HashKey::from(42i64))? {
//!     for row in entry.rows() {
//!         println!("{:?}", row);
//!     }
//! }
//! table.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   SpillHashTable / HashTableBuilder      │  hashtable
//! ├────────────────────┬────────────────────┤
//! │    MemoryStore     │   OverflowStore     │  hashtable
//! │  + SpillBudget     │                     │  memory
//! ├────────────────────┼────────────────────┤
//! │                    │ HeapFile │ RunIndex │  storage
//! │                    ├──────────┴─────────┤
//! │                    │  TempSpace (files)  │  storage
//! └────────────────────┴────────────────────┘
//!          Value / Row / DataType              types
//! ```
//!
//! ## File Layout
//!
//! Overflow storage lives in a temp space directory, one file per
//! conglomerate:
//!
//! ```text
//! temp_space_dir/
//! ├── 000001.heap      # spilled rows
//! └── 000002.idx       # (hash, position) index over them
//! ```
//!
//! ## Module Overview
//!
//! - [`hashtable`]: keys, the two backends, the spill controller and facade
//! - [`memory`]: spill budget and memory sampling
//! - [`storage`]: row store, hash index and the temp space that owns them
//! - [`types`]: values, rows and column types
//! - [`config`]: constants

pub mod config;
pub mod hashtable;
pub mod memory;
pub mod storage;
pub mod types;

pub use hashtable::{
    Entry, HashKey, HashTableBuilder, HashTableError, RowSource, RuntimeStats, SpillHashTable,
    VecRowSource,
};
pub use memory::{FixedMemory, MemoryProbe, SystemMemory};
pub use storage::{Outcome, StorageError, TempSpace};
pub use types::{DataType, Row, RowLocation, Value};
