//! # Temporary Conglomerate Space
//!
//! Directory-backed [`Conglomerates`] factory. Every row store and hash index
//! it creates is one file in its directory, registered with its retention so
//! the end of the enclosing transaction can sweep it.
//!
//! ```text
//! temp_space_dir/
//! ├── 000001.heap
//! ├── 000002.idx
//! └── ...
//! ```
//!
//! ## Transaction Sweeps
//!
//! | Outcome  | Drops                                    |
//! |----------|------------------------------------------|
//! | Commit   | conglomerates created `DropAtCommit`     |
//! | Rollback | every registered conglomerate            |
//!
//! A swept conglomerate's file is deleted and its dropped flag is raised, so a
//! handle that outlived the sweep fails with [`StorageError::Dropped`] instead
//! of touching a missing file.
//!
//! ## Thread Safety
//!
//! The registry sits behind a `parking_lot::Mutex`, so one `TempSpace` can be
//! shared through an `Arc` by every table of a query. Individual conglomerate
//! handles are single-owner.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{
    ConglomerateId, Conglomerates, HashIndex, HeapFile, Retention, RowStore, RunIndex,
    StorageError,
};
use crate::types::Value;

/// How the enclosing transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Heap,
    Index,
}

impl Kind {
    fn extension(self) -> &'static str {
        match self {
            Kind::Heap => "heap",
            Kind::Index => "idx",
        }
    }
}

struct Registration {
    path: PathBuf,
    retention: Retention,
    kind: Kind,
    dropped: Arc<AtomicBool>,
}

pub struct TempSpace {
    dir: PathBuf,
    _owned: Option<TempDir>,
    next_id: AtomicU64,
    registry: Mutex<HashMap<ConglomerateId, Registration>>,
}

impl TempSpace {
    /// Uses an existing directory. Files left there are the caller's concern.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create temp space directory: {:?}", dir))?;
        Ok(Arc::new(Self {
            dir,
            _owned: None,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(HashMap::new()),
        }))
    }

    /// Creates a fresh directory under the system temp dir, removed with the
    /// space.
    pub fn new_temp() -> Result<Arc<Self>> {
        let owned = tempfile::Builder::new()
            .prefix("hashspill-")
            .tempdir()
            .wrap_err("failed to create temp space directory")?;
        Ok(Arc::new(Self {
            dir: owned.path().to_path_buf(),
            _owned: Some(owned),
            next_id: AtomicU64::new(1),
            registry: Mutex::new(HashMap::new()),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids of conglomerates created and not yet dropped, ascending.
    pub fn live_conglomerates(&self) -> Vec<ConglomerateId> {
        let mut ids: Vec<_> = self.registry.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_live(&self, id: ConglomerateId) -> bool {
        self.registry.lock().contains_key(&id)
    }

    /// Sweeps conglomerates that do not survive `outcome` and returns how many
    /// were dropped.
    pub fn end_transaction(&self, outcome: Outcome) -> Result<usize> {
        let swept: Vec<(ConglomerateId, Registration)> = {
            let mut registry = self.registry.lock();
            let ids: Vec<ConglomerateId> = registry
                .iter()
                .filter(|(_, reg)| {
                    outcome == Outcome::Rollback || reg.retention == Retention::DropAtCommit
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| registry.remove(&id).map(|reg| (id, reg)))
                .collect()
        };

        let count = swept.len();
        let mut first_err = None;
        for (id, reg) in swept {
            if let Err(e) = release(id, &reg) {
                first_err.get_or_insert(e);
            }
        }

        info!(?outcome, dropped = count, "temp space transaction sweep");
        match first_err {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    fn allocate(&self, kind: Kind, retention: Retention) -> (ConglomerateId, PathBuf, Arc<AtomicBool>) {
        let id = ConglomerateId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let path = self
            .dir
            .join(format!("{:06}.{}", id.0, kind.extension()));
        let dropped = Arc::new(AtomicBool::new(false));
        self.registry.lock().insert(
            id,
            Registration {
                path: path.clone(),
                retention,
                kind,
                dropped: dropped.clone(),
            },
        );
        (id, path, dropped)
    }

    fn abandon(&self, id: ConglomerateId) {
        let reg = self.registry.lock().remove(&id);
        if let Some(reg) = reg {
            match fs::remove_file(&reg.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(conglomerate = %id, path = ?reg.path, error = %e, "failed to remove partially created conglomerate file");
                }
            }
        }
    }
}

fn release(id: ConglomerateId, reg: &Registration) -> Result<()> {
    reg.dropped.store(true, Ordering::Release);
    match fs::remove_file(&reg.path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(conglomerate = %id, path = ?reg.path, error = %e, "failed to remove conglomerate file");
            return Err(e).wrap_err_with(|| format!("failed to drop {}", id));
        }
    }
    debug!(conglomerate = %id, kind = ?reg.kind, "dropped conglomerate");
    Ok(())
}

impl Conglomerates for TempSpace {
    fn create_row_store(
        &self,
        template: &[Value],
        retention: Retention,
    ) -> Result<Box<dyn RowStore>> {
        let (id, path, dropped) = self.allocate(Kind::Heap, retention);
        match HeapFile::create(id, &path, template, dropped) {
            Ok(heap) => {
                debug!(conglomerate = %id, columns = template.len(), ?retention, "created row store");
                Ok(Box::new(heap))
            }
            Err(e) => {
                self.abandon(id);
                Err(e)
            }
        }
    }

    fn create_hash_index(&self, retention: Retention) -> Result<Box<dyn HashIndex>> {
        let (id, path, dropped) = self.allocate(Kind::Index, retention);
        match RunIndex::create(id, &path, dropped) {
            Ok(index) => {
                debug!(conglomerate = %id, ?retention, "created hash index");
                Ok(Box::new(index))
            }
            Err(e) => {
                self.abandon(id);
                Err(e)
            }
        }
    }

    fn drop_conglomerate(&self, id: ConglomerateId) -> Result<()> {
        let reg = match self.registry.lock().remove(&id) {
            Some(reg) => reg,
            None => bail!(StorageError::Dropped { id }),
        };
        release(id, &reg)
    }
}

impl Drop for TempSpace {
    fn drop(&mut self) {
        for (id, reg) in self.registry.get_mut().drain() {
            let _ = release(id, &reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IndexEntry, RowPosition, ScanBound};
    use tempfile::tempdir;

    #[test]
    fn creates_files_in_directory() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();

        let heap = space
            .create_row_store(&[Value::Int(1)], Retention::DropAtCommit)
            .unwrap();
        let index = space.create_hash_index(Retention::DropAtCommit).unwrap();

        assert!(dir.path().join(format!("{:06}.heap", heap.id().0)).exists());
        assert!(dir.path().join(format!("{:06}.idx", index.id().0)).exists());
        assert_eq!(space.live_conglomerates(), vec![heap.id(), index.id()]);
    }

    #[test]
    fn drop_invalidates_handle_and_removes_file() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let mut heap = space
            .create_row_store(&[Value::Int(1)], Retention::KeepAfterCommit)
            .unwrap();
        let pos = heap.append(&[Value::Int(7)]).unwrap();

        space.drop_conglomerate(heap.id()).unwrap();

        let err = heap.fetch(pos).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Dropped { .. })
        ));
        assert!(!space.is_live(heap.id()));
        assert!(space.drop_conglomerate(heap.id()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn commit_keeps_retained_conglomerates() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let short = space.create_hash_index(Retention::DropAtCommit).unwrap();
        let mut kept = space.create_hash_index(Retention::KeepAfterCommit).unwrap();

        assert_eq!(space.end_transaction(Outcome::Commit).unwrap(), 1);
        assert!(!space.is_live(short.id()));
        assert!(space.is_live(kept.id()));

        kept.insert(IndexEntry {
            hash: 1,
            position: RowPosition(16),
        })
        .unwrap();
        assert_eq!(kept.scan(ScanBound::ge(1), ScanBound::gt(1)).unwrap().len(), 1);
    }

    #[test]
    fn rollback_drops_everything() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        let _a = space.create_hash_index(Retention::DropAtCommit).unwrap();
        let mut b = space.create_hash_index(Retention::KeepAfterCommit).unwrap();

        assert_eq!(space.end_transaction(Outcome::Rollback).unwrap(), 2);
        assert!(space.live_conglomerates().is_empty());
        assert!(b.scan(ScanBound::ge(0), ScanBound::gt(0)).is_err());
    }

    #[test]
    fn failed_create_is_unregistered() {
        let dir = tempdir().unwrap();
        let space = TempSpace::new(dir.path()).unwrap();
        // a directory squatting on the next heap file name
        let squatter = dir.path().join("000001.heap");
        std::fs::create_dir(&squatter).unwrap();

        assert!(space
            .create_row_store(&[Value::Int(1)], Retention::DropAtCommit)
            .is_err());
        assert!(space.live_conglomerates().is_empty());
        assert!(squatter.is_dir());

        let heap = space
            .create_row_store(&[Value::Int(1)], Retention::DropAtCommit)
            .unwrap();
        assert_eq!(space.live_conglomerates(), vec![heap.id()]);
    }

    #[test]
    fn owned_directory_is_removed_on_drop() {
        let space = TempSpace::new_temp().unwrap();
        let dir = space.dir().to_path_buf();
        let _heap = space
            .create_row_store(&[Value::Null], Retention::DropAtCommit)
            .unwrap();
        assert!(dir.exists());
        drop(space);
        assert!(!dir.exists());
    }
}
