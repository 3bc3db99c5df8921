use eyre::Result;

use crate::types::{Row, RowLocation, Value};

/// One row handed out by a [`RowSource`]. The borrow ends at the next call,
/// so consumers copy what they keep.
#[derive(Debug, Clone, Copy)]
pub struct SourceRow<'a> {
    pub values: &'a [Value],
    pub location: Option<RowLocation>,
}

/// Pull-based producer of rows. `Ok(None)` signals end of data.
pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<SourceRow<'_>>>;
}

/// Row source over an owned vector of rows.
#[derive(Debug, Default)]
pub struct VecRowSource {
    rows: Vec<Row>,
    next: usize,
}

impl VecRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, next: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len() - self.next
    }
}

impl From<Vec<Row>> for VecRowSource {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

impl RowSource for VecRowSource {
    fn next_row(&mut self) -> Result<Option<SourceRow<'_>>> {
        let row = match self.rows.get(self.next) {
            Some(row) => row,
            None => return Ok(None),
        };
        self.next += 1;
        Ok(Some(SourceRow {
            values: &row.values,
            location: row.location,
        }))
    }
}
