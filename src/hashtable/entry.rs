use crate::types::Row;

/// What a key maps to: one row, or every row sharing the key in insertion
/// order. A group always holds at least two rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Single(Row),
    Group(Vec<Row>),
}

impl Entry {
    /// Wraps `rows`, `None` when empty.
    pub fn from_rows(mut rows: Vec<Row>) -> Option<Self> {
        match rows.len() {
            0 => None,
            1 => rows.pop().map(Entry::Single),
            _ => Some(Entry::Group(rows)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Entry::Single(_) => 1,
            Entry::Group(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Entry::Group(_))
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            Entry::Single(row) => std::slice::from_ref(row),
            Entry::Group(rows) => rows,
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Entry::Single(row) => vec![row],
            Entry::Group(rows) => rows,
        }
    }

    /// Appends a duplicate. Returns true if this promoted a single row to a
    /// group.
    pub fn push(&mut self, row: Row) -> bool {
        match self {
            Entry::Group(rows) => {
                rows.push(row);
                false
            }
            Entry::Single(_) => {
                let previous = std::mem::replace(self, Entry::Group(Vec::with_capacity(2)));
                if let (Entry::Single(first), Entry::Group(rows)) = (previous, &mut *self) {
                    rows.push(first);
                    rows.push(row);
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn push_promotes_then_appends() {
        let mut entry = Entry::Single(row![1, "a"]);
        assert!(entry.push(row![1, "b"]));
        assert!(!entry.push(row![1, "c"]));
        assert_eq!(
            entry,
            Entry::Group(vec![row![1, "a"], row![1, "b"], row![1, "c"]])
        );
    }

    #[test]
    fn from_rows_picks_variant() {
        assert_eq!(Entry::from_rows(vec![]), None);
        assert_eq!(
            Entry::from_rows(vec![row![1]]),
            Some(Entry::Single(row![1]))
        );
        assert!(Entry::from_rows(vec![row![1], row![1]]).unwrap().is_group());
    }
}
