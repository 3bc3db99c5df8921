//! Property tests: whatever the row cap, a table answers every lookup the way
//! a plain in-memory multimap would.

use std::borrow::Cow;
use std::collections::BTreeMap;

use hashspill::storage::TempSpace;
use hashspill::{Entry, HashKey, HashTableBuilder, Row, SpillHashTable, Value};
use proptest::prelude::*;
use tempfile::TempDir;

fn rows_strategy() -> impl Strategy<Value = Vec<(i64, String)>> {
    proptest::collection::vec((0i64..20, "[a-z]{0,8}"), 0..80)
}

fn make_row(key: i64, payload: &str) -> Row {
    Row::new(vec![Value::Int(key), Value::from(payload)])
}

fn build(dir: &TempDir, name: &str, cap: usize, remove_duplicates: bool) -> SpillHashTable {
    let space = TempSpace::new(dir.path().join(name)).expect("temp space");
    HashTableBuilder::new(space, vec![0])
        .remove_duplicates(remove_duplicates)
        .max_in_memory_rows(cap)
        .build()
        .expect("build")
}

fn lookup(table: &mut SpillHashTable, key: i64) -> Option<Vec<Row>> {
    table
        .get(&HashKey::from(key))
        .expect("get")
        .map(Cow::into_owned)
        .map(Entry::into_rows)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn groups_match_multimap(rows in rows_strategy(), cap in 0usize..8) {
        let dir = TempDir::new().unwrap();
        let mut table = build(&dir, "grouped", cap, false);

        let mut expected: BTreeMap<i64, Vec<Row>> = BTreeMap::new();
        for (key, payload) in &rows {
            prop_assert!(table.put(make_row(*key, payload)).unwrap());
            expected.entry(*key).or_default().push(make_row(*key, payload));
        }

        prop_assert_eq!(table.size().unwrap(), expected.len() as u64);
        for key in 0..20i64 {
            prop_assert_eq!(lookup(&mut table, key), expected.get(&key).cloned(), "key {}", key);
        }
        table.close().unwrap();
    }

    #[test]
    fn spilling_is_invisible(rows in rows_strategy(), cap in 0usize..8) {
        let dir = TempDir::new().unwrap();
        let mut unbounded = build(&dir, "unbounded", usize::MAX, false);
        let mut capped = build(&dir, "capped", cap, false);

        for (key, payload) in &rows {
            unbounded.put(make_row(*key, payload)).unwrap();
            capped.put(make_row(*key, payload)).unwrap();
        }

        prop_assert!(!unbounded.is_spilled());
        prop_assert_eq!(unbounded.size().unwrap(), capped.size().unwrap());
        for key in 0..20i64 {
            prop_assert_eq!(lookup(&mut unbounded, key), lookup(&mut capped, key));
        }

        let mut all: Vec<Row> = capped
            .elements()
            .unwrap()
            .flat_map(|entry| entry.unwrap().into_owned().into_rows())
            .collect();
        all.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
        let mut input: Vec<Row> = rows.iter().map(|(k, p)| make_row(*k, p)).collect();
        input.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
        prop_assert_eq!(all, input);
    }

    #[test]
    fn first_row_wins(rows in rows_strategy(), cap in 0usize..8) {
        let dir = TempDir::new().unwrap();
        let mut table = build(&dir, "distinct", cap, true);

        let mut expected: BTreeMap<i64, Row> = BTreeMap::new();
        for (key, payload) in &rows {
            let fresh = !expected.contains_key(key);
            prop_assert_eq!(table.put(make_row(*key, payload)).unwrap(), fresh);
            expected.entry(*key).or_insert_with(|| make_row(*key, payload));
        }

        prop_assert_eq!(table.size().unwrap(), expected.len() as u64);
        for (key, row) in expected {
            prop_assert_eq!(lookup(&mut table, key), Some(vec![row]));
        }
    }
}
