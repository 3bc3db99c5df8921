//! # Run Index: Ordered (hash, position) Index
//!
//! The hash index half of an overflow store. It holds `(hash, position)`
//! pairs, unique on the pair and ordered by hash then position, and answers
//! range scans bounded by greater-or-equal / strictly-greater operators.
//!
//! ## Structure
//!
//! ```text
//! +--------------------+       +--------------------------------------+
//! |  memtable          |       |  index file                          |
//! |  BTreeSet<Entry>   | flush |  [header][run 0][run 1]...[run n]    |
//! |  <= 4096 entries   | ----> |  each run sorted by (hash, position) |
//! +--------------------+       +--------------------------------------+
//! ```
//!
//! - New entries go to the in-memory memtable.
//! - A full memtable is written to the end of the file as one sorted run.
//! - A probe searches the memtable and binary-searches every run.
//! - When the run count exceeds `INDEX_MAX_RUNS`, all runs are merged into a
//!   single run in a fresh file, dropping deleted entries.
//!
//! ## Entry Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!  0       8    hash (u64 big-endian)
//!  8       8    position (u64 big-endian, top bit = deleted)
//! ```
//!
//! Deleting an entry that already reached a run sets the top bit of its
//! position in place. Row positions are byte offsets well below 2^63, so the
//! bit is free, and ordering ignores it.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::Mmap;
use tracing::debug;
use zerocopy::byteorder::{BigEndian, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{
    ConglomerateId, HashIndex, IndexEntry, RowPosition, ScanBound, ScanOp, StorageError,
};
use crate::config::{
    INDEX_ENTRY_SIZE, INDEX_FILE_HEADER_SIZE, INDEX_MAGIC, INDEX_MAX_RUNS, INDEX_MEMTABLE_ENTRIES,
};

const TOMBSTONE_BIT: u64 = 1 << 63;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RawEntry {
    hash: U64<BigEndian>,
    position: U64<BigEndian>,
}

const _: () = assert!(std::mem::size_of::<RawEntry>() == INDEX_ENTRY_SIZE);

impl RawEntry {
    fn new(hash: u64, position: u64) -> Self {
        Self {
            hash: U64::new(hash),
            position: U64::new(position),
        }
    }

    fn is_deleted(&self) -> bool {
        self.position.get() & TOMBSTONE_BIT != 0
    }

    fn key(&self) -> (u64, u64) {
        (self.hash.get(), self.position.get() & !TOMBSTONE_BIT)
    }
}

/// Lowest hash a scan starting at `start` can return.
fn first_hash(start: ScanBound) -> Option<u64> {
    match start.op {
        ScanOp::Ge => Some(start.hash),
        ScanOp::Gt => start.hash.checked_add(1),
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    offset: u64,
    len: u64,
}

impl Run {
    fn entry_offset(&self, idx: u64) -> u64 {
        self.offset + idx * INDEX_ENTRY_SIZE as u64
    }

    fn read(&self, map: &Mmap, idx: u64) -> Result<RawEntry> {
        let start = self.entry_offset(idx) as usize;
        let bytes = map
            .get(start..start + INDEX_ENTRY_SIZE)
            .ok_or_else(|| eyre::eyre!("index entry {} of run at {} out of range", idx, self.offset))?;
        RawEntry::read_from_bytes(bytes)
            .map_err(|_| eyre::eyre!("malformed index entry at offset {}", start))
    }

    /// Index of the first entry whose key is >= `key`.
    fn lower_bound(&self, map: &Mmap, key: (u64, u64)) -> Result<u64> {
        let mut lo = 0;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.read(map, mid)?.key() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

pub struct RunIndex {
    id: ConglomerateId,
    path: PathBuf,
    file: File,
    memtable: BTreeSet<IndexEntry>,
    runs: Vec<Run>,
    map: Option<Mmap>,
    end: u64,
    live: u64,
    dropped: Arc<AtomicBool>,
}

fn write_header(file: &mut impl Write) -> Result<()> {
    let mut header = [0u8; INDEX_FILE_HEADER_SIZE];
    header[..8].copy_from_slice(INDEX_MAGIC);
    file.write_all(&header)?;
    Ok(())
}

fn open_rw(path: &Path) -> Result<File> {
    File::options()
        .read(true)
        .write(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open index file: {:?}", path))
}

impl RunIndex {
    pub(super) fn create(id: ConglomerateId, path: &Path, dropped: Arc<AtomicBool>) -> Result<Self> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file: {:?}", path))?;
        write_header(&mut file)
            .wrap_err_with(|| format!("failed to write index header: {:?}", path))?;

        file.seek(SeekFrom::Start(0))?;
        let mut check = [0u8; 8];
        file.read_exact(&mut check)?;
        if &check != INDEX_MAGIC {
            bail!(StorageError::BadHeader {
                path: path.to_path_buf()
            });
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            memtable: BTreeSet::new(),
            runs: Vec::new(),
            map: None,
            end: INDEX_FILE_HEADER_SIZE as u64,
            live: 0,
            dropped,
        })
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            bail!(StorageError::Dropped { id: self.id });
        }
        Ok(())
    }

    fn remap(&mut self) -> Result<()> {
        self.map = None;
        if !self.runs.is_empty() {
            // SAFETY: the file is private to this index and only grows or is
            // replaced wholesale by a merge, which remaps afterwards.
            let map = unsafe { Mmap::map(&self.file) }
                .wrap_err_with(|| format!("failed to mmap index file: {:?}", self.path))?;
            self.map = Some(map);
        }
        Ok(())
    }

    /// Locates a live copy of `entry` in the runs as `(run, idx)`.
    fn find_in_runs(&self, entry: &IndexEntry) -> Result<Option<(usize, u64)>> {
        let map = match &self.map {
            Some(map) => map,
            None => return Ok(None),
        };
        let key = (entry.hash, entry.position.0);
        for (r, run) in self.runs.iter().enumerate() {
            let idx = run.lower_bound(map, key)?;
            if idx < run.len {
                let raw = run.read(map, idx)?;
                if raw.key() == key && !raw.is_deleted() {
                    return Ok(Some((r, idx)));
                }
            }
        }
        Ok(None)
    }

    fn flush_memtable(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(self.memtable.len() * INDEX_ENTRY_SIZE);
        for entry in &self.memtable {
            buf.extend_from_slice(RawEntry::new(entry.hash, entry.position.0).as_bytes());
        }

        self.file.seek(SeekFrom::Start(self.end))?;
        self.file
            .write_all(&buf)
            .wrap_err_with(|| format!("failed to write index run: {:?}", self.path))?;

        let run = Run {
            offset: self.end,
            len: self.memtable.len() as u64,
        };
        self.end += buf.len() as u64;
        self.runs.push(run);
        self.memtable.clear();
        debug!(index = %self.id, runs = self.runs.len(), entries = run.len, "flushed index run");

        if self.runs.len() > INDEX_MAX_RUNS {
            self.merge_runs()?;
        } else {
            self.remap()?;
        }
        Ok(())
    }

    fn merge_runs(&mut self) -> Result<()> {
        self.remap()?;
        let map = match self.map.take() {
            Some(map) => map,
            None => return Ok(()),
        };

        let merge_path = self.path.with_extension("merge");
        let mut out = BufWriter::new(
            File::create(&merge_path)
                .wrap_err_with(|| format!("failed to create merge file: {:?}", merge_path))?,
        );
        write_header(&mut out)?;

        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (r, run) in self.runs.iter().enumerate() {
            if run.len > 0 {
                heap.push(Reverse((run.read(&map, 0)?.key(), r, 0u64)));
            }
        }

        let mut written = 0u64;
        while let Some(Reverse((_, r, idx))) = heap.pop() {
            let run = self.runs[r];
            let raw = run.read(&map, idx)?;
            if !raw.is_deleted() {
                out.write_all(raw.as_bytes())?;
                written += 1;
            }
            if idx + 1 < run.len {
                heap.push(Reverse((run.read(&map, idx + 1)?.key(), r, idx + 1)));
            }
        }

        out.flush()?;
        drop(out);
        drop(map);

        fs::rename(&merge_path, &self.path)
            .wrap_err_with(|| format!("failed to replace index file: {:?}", self.path))?;
        self.file = open_rw(&self.path)?;

        let merged_from = self.runs.len();
        self.runs.clear();
        if written > 0 {
            self.runs.push(Run {
                offset: INDEX_FILE_HEADER_SIZE as u64,
                len: written,
            });
        }
        self.end = INDEX_FILE_HEADER_SIZE as u64 + written * INDEX_ENTRY_SIZE as u64;
        debug!(index = %self.id, merged_from, entries = written, "merged index runs");
        self.remap()
    }
}

impl HashIndex for RunIndex {
    fn id(&self) -> ConglomerateId {
        self.id
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<()> {
        self.ensure_live()?;
        ensure!(
            entry.position.0 & TOMBSTONE_BIT == 0,
            "row position {} out of indexable range",
            entry.position.0
        );

        if self.memtable.contains(&entry) || self.find_in_runs(&entry)?.is_some() {
            bail!(StorageError::DuplicateEntry { id: self.id, entry });
        }

        self.memtable.insert(entry);
        self.live += 1;

        if self.memtable.len() >= INDEX_MEMTABLE_ENTRIES {
            self.flush_memtable()?;
        }
        Ok(())
    }

    fn scan(&mut self, start: ScanBound, stop: ScanBound) -> Result<Vec<IndexEntry>> {
        self.ensure_live()?;

        let Some(first_hash) = first_hash(start) else {
            return Ok(Vec::new());
        };

        let lower = IndexEntry {
            hash: first_hash,
            position: RowPosition(0),
        };
        let mut out: Vec<IndexEntry> = self
            .memtable
            .range(lower..)
            .take_while(|e| !stop.reached_by(e.hash))
            .copied()
            .collect();

        if let Some(map) = &self.map {
            for run in &self.runs {
                let mut idx = run.lower_bound(map, (first_hash, 0))?;
                while idx < run.len {
                    let raw = run.read(map, idx)?;
                    let (hash, position) = raw.key();
                    if stop.reached_by(hash) {
                        break;
                    }
                    if !raw.is_deleted() {
                        out.push(IndexEntry {
                            hash,
                            position: RowPosition(position),
                        });
                    }
                    idx += 1;
                }
            }
        }

        out.sort_unstable();
        Ok(out)
    }

    fn find(
        &mut self,
        start: ScanBound,
        stop: ScanBound,
        visit: &mut dyn FnMut(IndexEntry) -> Result<bool>,
    ) -> Result<bool> {
        self.ensure_live()?;

        let Some(first_hash) = first_hash(start) else {
            return Ok(false);
        };

        // newest entries first: the memtable, then runs from the latest flush
        let lower = IndexEntry {
            hash: first_hash,
            position: RowPosition(0),
        };
        for entry in self.memtable.range(lower..) {
            if stop.reached_by(entry.hash) {
                break;
            }
            if visit(*entry)? {
                return Ok(true);
            }
        }

        if let Some(map) = &self.map {
            for run in self.runs.iter().rev() {
                let mut idx = run.lower_bound(map, (first_hash, 0))?;
                while idx < run.len {
                    let raw = run.read(map, idx)?;
                    let (hash, position) = raw.key();
                    if stop.reached_by(hash) {
                        break;
                    }
                    if !raw.is_deleted()
                        && visit(IndexEntry {
                            hash,
                            position: RowPosition(position),
                        })?
                    {
                        return Ok(true);
                    }
                    idx += 1;
                }
            }
        }
        Ok(false)
    }

    fn delete(&mut self, entry: IndexEntry) -> Result<bool> {
        self.ensure_live()?;

        if self.memtable.remove(&entry) {
            self.live -= 1;
            return Ok(true);
        }

        let (r, idx) = match self.find_in_runs(&entry)? {
            Some(found) => found,
            None => return Ok(false),
        };

        let offset = self.runs[r].entry_offset(idx) + 8;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .write_all(&(entry.position.0 | TOMBSTONE_BIT).to_be_bytes())
            .wrap_err_with(|| format!("failed to delete index entry in {:?}", self.path))?;
        self.live -= 1;
        Ok(true)
    }

    fn len(&self) -> u64 {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn index(dir: &Path) -> RunIndex {
        RunIndex::create(
            ConglomerateId(2),
            &dir.join("t.idx"),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
    }

    fn entry(hash: u64, pos: u64) -> IndexEntry {
        IndexEntry {
            hash,
            position: RowPosition(pos),
        }
    }

    fn bucket(index: &mut RunIndex, hash: u64) -> Vec<u64> {
        index
            .scan(ScanBound::ge(hash), ScanBound::gt(hash))
            .unwrap()
            .into_iter()
            .map(|e| e.position.0)
            .collect()
    }

    #[test]
    fn equality_probe_in_memtable() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        index.insert(entry(5, 100)).unwrap();
        index.insert(entry(5, 50)).unwrap();
        index.insert(entry(6, 10)).unwrap();
        index.insert(entry(4, 10)).unwrap();

        assert_eq!(bucket(&mut index, 5), vec![50, 100]);
        assert_eq!(bucket(&mut index, 7), Vec::<u64>::new());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        index.insert(entry(1, 16)).unwrap();
        let err = index.insert(entry(1, 16)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::DuplicateEntry { .. })
        ));
        index.insert(entry(1, 17)).unwrap();
    }

    #[test]
    fn gt_start_and_ge_stop() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        for h in 1..=5 {
            index.insert(entry(h, h * 100)).unwrap();
        }
        let got: Vec<u64> = index
            .scan(ScanBound::gt(1), ScanBound::ge(4))
            .unwrap()
            .into_iter()
            .map(|e| e.hash)
            .collect();
        assert_eq!(got, vec![2, 3]);

        assert!(index
            .scan(ScanBound::gt(u64::MAX), ScanBound::gt(u64::MAX))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn probes_span_runs_and_memtable() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        let total = INDEX_MEMTABLE_ENTRIES as u64 * 2 + 10;
        for pos in 0..total {
            index.insert(entry(pos % 7, 16 + pos)).unwrap();
        }
        assert!(index.run_count() >= 2);

        let hits = bucket(&mut index, 3);
        let expected: Vec<u64> = (0..total).filter(|p| p % 7 == 3).map(|p| 16 + p).collect();
        assert_eq!(hits, expected);
        assert_eq!(index.len(), total);
    }

    #[test]
    fn delete_from_run_and_memtable() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        for pos in 0..INDEX_MEMTABLE_ENTRIES as u64 {
            index.insert(entry(9, pos + 16)).unwrap();
        }
        assert_eq!(index.run_count(), 1);
        index.insert(entry(9, 1 << 20)).unwrap();

        assert!(index.delete(entry(9, 16)).unwrap());
        assert!(!index.delete(entry(9, 16)).unwrap());
        assert!(index.delete(entry(9, 1 << 20)).unwrap());

        let hits = bucket(&mut index, 9);
        assert_eq!(hits.len(), INDEX_MEMTABLE_ENTRIES - 1);
        assert!(!hits.contains(&16));

        index.insert(entry(9, 16)).unwrap();
        assert_eq!(bucket(&mut index, 9).len(), INDEX_MEMTABLE_ENTRIES);
    }

    #[test]
    fn merge_keeps_live_entries_only() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        let total = (INDEX_MAX_RUNS as u64 + 1) * INDEX_MEMTABLE_ENTRIES as u64;

        for pos in 0..INDEX_MEMTABLE_ENTRIES as u64 {
            index.insert(entry(pos % 3, pos + 16)).unwrap();
        }
        index.delete(entry(0, 16)).unwrap();

        for pos in INDEX_MEMTABLE_ENTRIES as u64..total {
            index.insert(entry(pos % 3, pos + 16)).unwrap();
        }

        assert_eq!(index.run_count(), 1);
        assert_eq!(index.len(), total - 1);

        let zeros = bucket(&mut index, 0);
        assert_eq!(zeros.len() as u64, (total + 2) / 3 - 1);
        assert!(!zeros.contains(&16));
        assert!(zeros.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn find_stops_at_first_accepted_entry() {
        let dir = tempdir().unwrap();
        let mut index = index(dir.path());
        for pos in 0..INDEX_MEMTABLE_ENTRIES as u64 + 3 {
            index.insert(entry(pos % 2, pos + 16)).unwrap();
        }
        index.delete(entry(1, 17)).unwrap();
        assert_eq!(index.run_count(), 1);

        let mut visited = 0;
        let found = index
            .find(ScanBound::ge(1), ScanBound::gt(1), &mut |e| {
                assert_eq!(e.hash, 1);
                visited += 1;
                Ok(true)
            })
            .unwrap();
        assert!(found);
        assert_eq!(visited, 1);

        // rejecting everything visits each live entry of the bucket once
        let mut seen = Vec::new();
        let found = index
            .find(ScanBound::ge(1), ScanBound::gt(1), &mut |e| {
                seen.push(e.position.0);
                Ok(false)
            })
            .unwrap();
        assert!(!found);
        seen.sort_unstable();
        assert_eq!(seen, bucket(&mut index, 1));
        assert!(!seen.contains(&17));

        assert!(!index
            .find(ScanBound::gt(u64::MAX), ScanBound::gt(u64::MAX), &mut |_| Ok(true))
            .unwrap());
    }

    #[test]
    fn dropped_index_fails() {
        let dir = tempdir().unwrap();
        let dropped = Arc::new(AtomicBool::new(false));
        let mut index =
            RunIndex::create(ConglomerateId(3), &dir.path().join("x.idx"), dropped.clone())
                .unwrap();
        index.insert(entry(1, 16)).unwrap();
        dropped.store(true, Ordering::Release);
        assert!(index.scan(ScanBound::ge(1), ScanBound::gt(1)).is_err());
        assert!(index.insert(entry(2, 16)).is_err());
    }
}
