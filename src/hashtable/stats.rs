use std::collections::BTreeMap;
use std::fmt;

/// Budget state at the time statistics were taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSnapshot {
    /// Bytes left in a byte budget. Negative once overdrawn.
    RemainingBytes(i64),
    /// Row cap of a row-count budget.
    RowCap(usize),
}

/// Snapshot of a hash table's shape, for plan explanations and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub keys_in_memory: u64,
    pub rows_in_memory: usize,
    pub max_bucket_rows: usize,
    pub spilled: bool,
    pub keys_on_disk: u64,
    pub rows_written_to_disk: u64,
    pub budget: BudgetSnapshot,
    pub auxiliary: BTreeMap<String, String>,
}

impl fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hash table keys in memory: {}", self.keys_in_memory)?;
        writeln!(f, "Hash table rows in memory: {}", self.rows_in_memory)?;
        writeln!(f, "Largest in-memory bucket: {} rows", self.max_bucket_rows)?;
        match self.budget {
            BudgetSnapshot::RemainingBytes(bytes) => {
                writeln!(f, "Remaining memory budget: {} bytes", bytes)?
            }
            BudgetSnapshot::RowCap(rows) => writeln!(f, "In-memory row cap: {}", rows)?,
        }
        if self.spilled {
            writeln!(f, "Spilled to disk: yes")?;
            writeln!(f, "Hash table keys on disk: {}", self.keys_on_disk)?;
            writeln!(f, "Rows written to disk: {}", self.rows_written_to_disk)?;
        } else {
            writeln!(f, "Spilled to disk: no")?;
        }
        for (name, value) in &self.auxiliary {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}
