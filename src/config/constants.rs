//! # hashspill Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! MEMORY_BUDGET_PERCENT (1%)
//!       │
//!       └─> byte budget = available memory * percent / 100, sampled once
//!             when a hash table is built. MIN_SYSTEM_MEMORY_FLOOR keeps the
//!             sample meaningful on hosts that under-report.
//!
//! COLUMN_REFERENCE_SIZE (8) ─┐
//! ROW_OVERHEAD_SIZE (24)    ─┼─> per-row estimate charged against the budget
//! ROW_LOCATION_SIZE (16)    ─┘
//! GROUP_OVERHEAD_SIZE (32)  ───> charged once when a key gets its second row
//!
//! HEAP_FILE_HEADER_SIZE (16)
//!       │
//!       └─> first valid row position; position 0 is never a record
//!
//! INDEX_ENTRY_SIZE (16)
//!       │
//!       ├─> INDEX_MEMTABLE_ENTRIES * INDEX_ENTRY_SIZE = bytes held before a run flush
//!       │
//!       └─> INDEX_MAX_RUNS bounds the binary searches per probe
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `HEAP_RECORD_HEADER_SIZE == 1 + 4 + 4` (flags, length, crc32)
//! 2. `INDEX_MAX_RUNS >= 2` (a merge needs at least two inputs)
//! 3. `0 < MEMORY_BUDGET_PERCENT <= 100`

// ============================================================================
// IN-MEMORY HASH TABLE SIZING
// ============================================================================

/// Initial bucket capacity when neither an explicit capacity nor a row
/// estimate is available.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Load factor assumed when an initial capacity is given without one.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// Upper bound on the keys reserved up front. Larger tables grow on demand.
pub const MAX_INITIAL_RESERVATION: usize = 1 << 20;

const _: () = assert!(
    MAX_INITIAL_RESERVATION >= DEFAULT_INITIAL_CAPACITY,
    "MAX_INITIAL_RESERVATION must fit the default capacity"
);

// ============================================================================
// MEMORY BUDGET CONFIGURATION
// ============================================================================

/// Share of available memory (in percent) granted to one hash table when no
/// row-count cap is configured.
pub const MEMORY_BUDGET_PERCENT: usize = 1;

/// Lower bound applied to the system memory sample (16MB).
pub const MIN_SYSTEM_MEMORY_FLOOR: usize = 16 * 1024 * 1024;

const _: () = assert!(
    MEMORY_BUDGET_PERCENT > 0 && MEMORY_BUDGET_PERCENT <= 100,
    "MEMORY_BUDGET_PERCENT must be within (0, 100]"
);

// ============================================================================
// ROW SIZE ESTIMATION
// Approximate heap footprint of rows retained in memory
// ============================================================================

/// Overhead charged per column on top of the value's own estimate.
pub const COLUMN_REFERENCE_SIZE: usize = 8;

/// Fixed overhead of one retained row (vector header plus map slot).
pub const ROW_OVERHEAD_SIZE: usize = 24;

/// Extra bytes for a row that carries a location marker.
pub const ROW_LOCATION_SIZE: usize = 16;

/// Overhead of the duplicate list created when a key gets its second row.
pub const GROUP_OVERHEAD_SIZE: usize = 32;

// ============================================================================
// OVERFLOW HEAP FILE LAYOUT
// ============================================================================

/// Magic bytes at the start of every heap file.
pub const HEAP_MAGIC: &[u8; 8] = b"HSPHEAP\0";

/// Size of the heap file header. Row positions start here.
pub const HEAP_FILE_HEADER_SIZE: usize = 16;

/// Per-record header: flags (1) + payload length (4) + crc32 (4).
pub const HEAP_RECORD_HEADER_SIZE: usize = 9;

/// Record flag: the row has been deleted.
pub const HEAP_FLAG_DELETED: u8 = 0x01;

const _: () = assert!(
    HEAP_RECORD_HEADER_SIZE == 1 + 4 + 4,
    "HEAP_RECORD_HEADER_SIZE must cover flags, length and checksum"
);

// ============================================================================
// OVERFLOW HASH INDEX LAYOUT
// ============================================================================

/// Magic bytes at the start of every index file.
pub const INDEX_MAGIC: &[u8; 8] = b"HSPINDX\0";

/// Size of the index file header. Runs start here.
pub const INDEX_FILE_HEADER_SIZE: usize = 16;

/// Size of one (hash, position) entry.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Entries buffered in memory before they are written out as a sorted run.
pub const INDEX_MEMTABLE_ENTRIES: usize = 4096;

/// Number of runs tolerated before all runs are merged into one.
pub const INDEX_MAX_RUNS: usize = 8;

const _: () = assert!(INDEX_MAX_RUNS >= 2, "INDEX_MAX_RUNS must allow a merge");
