//! # Memory Budget Management
//!
//! This module decides how much a hash table may keep in memory before it
//! spills to disk.
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |                     SpillBudget                          |
//! |                                                          |
//! |   RowCount { limit }         Bytes { initial }           |
//! |   retained_rows < limit      remaining > row estimate    |
//! |                                                          |
//! +----------------------------+-----------------------------+
//!                              |
//!                 sampled once at build time
//!                              |
//!               +--------------+--------------+
//!               |                             |
//!         SystemMemory                  FixedMemory
//!         (sysinfo, 16MB floor)         (constant, for tests)
//! ```
//!
//! ## Enforcement Model
//!
//! The budget never fails an allocation. A row the budget does not admit is
//! routed to the overflow store instead, and from that point on every new row
//! goes to disk.
//!
//! ## Configuration
//!
//! ```rust,ignore
//! // Row cap
//! let budget = SpillBudget::row_limit(10_000);
//!
//! // 1% of available memory, sampled now
//! let budget = SpillBudget::from_probe(&SystemMemory);
//! ```

mod budget;

pub use budget::{
    estimate_row_size, BudgetMode, FixedMemory, MemoryProbe, SpillBudget, SystemMemory,
};
