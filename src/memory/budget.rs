//! # Spill Budget Implementation
//!
//! This module implements the admission check a hash table consults before
//! retaining another row in memory.
//!
//! ## Budget Modes
//!
//! 1. **Row count**: a hard cap on rows retained in memory. The cap is
//!    compared against the current retained-row count.
//! 2. **Bytes**: a byte budget computed once, when the table is built, as a
//!    fixed share of the memory a [`MemoryProbe`] reports. Every admitted row
//!    is charged its estimated size; the first duplicate of a key is also
//!    charged the duplicate list overhead.
//!
//! A budget only ever shrinks. Removing rows from the table does not refund
//! anything: once the table spills it never moves rows back, so a refund
//! would have nothing to unlock.
//!
//! ## Row Size Estimates
//!
//! | Component | Estimate |
//! |-----------|----------|
//! | Each column | value estimate + `COLUMN_REFERENCE_SIZE` |
//! | Each row | `ROW_OVERHEAD_SIZE` |
//! | Row with a location | + `ROW_LOCATION_SIZE` |
//! | First duplicate of a key | + `GROUP_OVERHEAD_SIZE` |
//!
//! The estimates are deliberately rough. The goal is to keep a runaway build
//! side from exhausting memory, not precise accounting.
//!
//! ## Testing
//!
//! Live process memory is a poor test input, so the memory sample is taken
//! through the [`MemoryProbe`] trait. [`FixedMemory`] reports a constant.

use sysinfo::System;

use crate::config::{
    COLUMN_REFERENCE_SIZE, DEFAULT_INITIAL_CAPACITY, GROUP_OVERHEAD_SIZE, MEMORY_BUDGET_PERCENT,
    MIN_SYSTEM_MEMORY_FLOOR, ROW_LOCATION_SIZE, ROW_OVERHEAD_SIZE,
};
use crate::types::Row;

/// Source of the "available memory" sample used for byte budgets.
pub trait MemoryProbe {
    fn available_memory(&self) -> usize;
}

/// Samples available system memory through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_memory(&self) -> usize {
        let mut sys = System::new();
        sys.refresh_memory();
        (sys.available_memory() as usize).max(MIN_SYSTEM_MEMORY_FLOOR)
    }
}

/// Reports a constant amount of available memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub usize);

impl MemoryProbe for FixedMemory {
    fn available_memory(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetMode {
    RowCount { limit: usize },
    Bytes { initial: usize },
}

/// Estimated in-memory footprint of one retained row.
pub fn estimate_row_size(row: &Row) -> usize {
    let columns: usize = row
        .values
        .iter()
        .map(|v| v.estimate_memory_usage() + COLUMN_REFERENCE_SIZE)
        .sum();
    let location = if row.location.is_some() {
        ROW_LOCATION_SIZE
    } else {
        0
    };
    columns + ROW_OVERHEAD_SIZE + location
}

#[derive(Debug, Clone)]
pub struct SpillBudget {
    mode: BudgetMode,
    remaining_bytes: i64,
    retained_rows: usize,
}

impl SpillBudget {
    pub fn row_limit(limit: usize) -> Self {
        Self {
            mode: BudgetMode::RowCount { limit },
            remaining_bytes: i64::MAX,
            retained_rows: 0,
        }
    }

    pub fn bytes(budget: usize) -> Self {
        Self {
            mode: BudgetMode::Bytes { initial: budget },
            remaining_bytes: budget.min(i64::MAX as usize) as i64,
            retained_rows: 0,
        }
    }

    /// Byte budget set to `MEMORY_BUDGET_PERCENT` of what `probe` reports now.
    pub fn from_probe(probe: &dyn MemoryProbe) -> Self {
        let available = probe.available_memory();
        Self::bytes(available / 100 * MEMORY_BUDGET_PERCENT)
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    /// Returns true if `row` may still be retained in memory.
    pub fn admits(&self, row: &Row) -> bool {
        match self.mode {
            BudgetMode::RowCount { limit } => self.retained_rows < limit,
            BudgetMode::Bytes { .. } => self.remaining_bytes > estimate_row_size(row) as i64,
        }
    }

    /// Charges one admitted row. `first_duplicate` is set when the row turned
    /// a single-row entry into a duplicate group.
    pub fn charge(&mut self, row: &Row, first_duplicate: bool) {
        self.retained_rows += 1;
        if let BudgetMode::Bytes { .. } = self.mode {
            self.remaining_bytes -= estimate_row_size(row) as i64;
            if first_duplicate {
                self.remaining_bytes -= GROUP_OVERHEAD_SIZE as i64;
            }
        }
    }

    pub fn retained_rows(&self) -> usize {
        self.retained_rows
    }

    /// Remaining byte budget, `None` in row-count mode. May be negative.
    pub fn remaining_bytes(&self) -> Option<i64> {
        match self.mode {
            BudgetMode::Bytes { .. } => Some(self.remaining_bytes),
            BudgetMode::RowCount { .. } => None,
        }
    }

    pub fn row_cap(&self) -> Option<usize> {
        match self.mode {
            BudgetMode::RowCount { limit } => Some(limit),
            BudgetMode::Bytes { .. } => None,
        }
    }

    /// Initial map capacity for a table expecting `estimated_rows` rows whose
    /// first row is `sample`. Never exceeds what the budget could hold.
    pub fn capacity_hint(&self, estimated_rows: usize, sample: Option<&Row>) -> usize {
        let fit = match (self.mode, sample) {
            (BudgetMode::RowCount { limit }, _) => estimated_rows.min(limit),
            (BudgetMode::Bytes { initial }, Some(row)) => {
                estimated_rows.min(initial / estimate_row_size(row).max(1))
            }
            (BudgetMode::Bytes { .. }, None) => DEFAULT_INITIAL_CAPACITY,
        };
        fit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RowLocation, Value};

    fn int_row(i: i64) -> Row {
        Row::new(vec![Value::Int(i), Value::Text("payload".into())])
    }

    #[test]
    fn row_limit_admits_until_cap() {
        let mut budget = SpillBudget::row_limit(2);
        let row = int_row(1);
        assert!(budget.admits(&row));
        budget.charge(&row, false);
        assert!(budget.admits(&row));
        budget.charge(&row, false);
        assert!(!budget.admits(&row));
        assert_eq!(budget.retained_rows(), 2);
        assert_eq!(budget.remaining_bytes(), None);
    }

    #[test]
    fn zero_row_limit_never_admits() {
        let budget = SpillBudget::row_limit(0);
        assert!(!budget.admits(&int_row(1)));
    }

    #[test]
    fn byte_budget_charges_estimate() {
        let row = int_row(1);
        let size = estimate_row_size(&row);
        let mut budget = SpillBudget::bytes(size * 2 + 1);
        assert!(budget.admits(&row));
        budget.charge(&row, false);
        assert!(budget.admits(&row));
        budget.charge(&row, false);
        assert!(!budget.admits(&row));
        assert_eq!(budget.remaining_bytes(), Some(1));
    }

    #[test]
    fn first_duplicate_charges_group_overhead() {
        let row = int_row(1);
        let size = estimate_row_size(&row) as i64;
        let mut budget = SpillBudget::bytes(10_000);
        budget.charge(&row, true);
        assert_eq!(
            budget.remaining_bytes(),
            Some(10_000 - size - GROUP_OVERHEAD_SIZE as i64)
        );
    }

    #[test]
    fn location_adds_to_estimate() {
        let plain = int_row(1);
        let located = Row::located(plain.values.clone(), RowLocation(3));
        assert_eq!(
            estimate_row_size(&located),
            estimate_row_size(&plain) + ROW_LOCATION_SIZE
        );
    }

    #[test]
    fn from_probe_takes_configured_share() {
        let budget = SpillBudget::from_probe(&FixedMemory(100 * 1024));
        assert_eq!(
            budget.mode(),
            BudgetMode::Bytes {
                initial: 1024 * MEMORY_BUDGET_PERCENT
            }
        );
    }

    #[test]
    fn system_probe_respects_floor() {
        assert!(SystemMemory.available_memory() >= MIN_SYSTEM_MEMORY_FLOOR);
    }

    #[test]
    fn capacity_hint_is_bounded_by_budget() {
        let row = int_row(1);
        assert_eq!(SpillBudget::row_limit(10).capacity_hint(1000, None), 10);
        assert_eq!(SpillBudget::row_limit(10).capacity_hint(4, None), 4);

        let size = estimate_row_size(&row);
        let bytes = SpillBudget::bytes(size * 5);
        assert_eq!(bytes.capacity_hint(1000, Some(&row)), 5);
        assert_eq!(bytes.capacity_hint(1000, None), DEFAULT_INITIAL_CAPACITY);
    }
}
