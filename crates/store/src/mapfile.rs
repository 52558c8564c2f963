//! Single-file JSON document store.
//!
//! One owner per file. Keeps an in-memory snapshot behind a read-write
//! lock; `set_all` replaces the whole document atomically on disk (write to
//! a temp file, fsync, rename) before swapping the snapshot, so readers see
//! either the pre- or post-state and a crash never leaves a torn file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use curio_domain::error::Result;

/// Write `bytes` to `path` through a sibling temp file with a durable
/// commit. Shared with the overlay store.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut f = File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    drop(f);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// A JSON document of type `T` owned by exactly one store instance.
pub struct MapFileStore<T> {
    path: PathBuf,
    auto_flush: bool,
    snapshot: RwLock<Arc<T>>,
    write_mu: Mutex<()>,
}

impl<T> MapFileStore<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    /// Open the store, creating the file (and parent directories) with the
    /// default document when missing. With `auto_flush` every `set_all`
    /// commits to disk; without it the caller flushes explicitly.
    pub fn open(path: impl Into<PathBuf>, auto_flush: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            let doc = T::default();
            let bytes = serde_json::to_vec_pretty(&doc)?;
            atomic_write(&path, &bytes)?;
            doc
        };

        tracing::debug!(path = %path.display(), "map file store opened");
        Ok(Self {
            path,
            auto_flush,
            snapshot: RwLock::new(Arc::new(doc)),
            write_mu: Mutex::new(()),
        })
    }

    /// Current snapshot. With `force` the document is re-read from disk
    /// first and the snapshot replaced.
    pub fn get_all(&self, force: bool) -> Result<Arc<T>> {
        if force {
            let _w = self.write_mu.lock();
            let raw = fs::read_to_string(&self.path)?;
            let doc: T = serde_json::from_str(&raw)?;
            let arc = Arc::new(doc);
            *self.snapshot.write() = arc.clone();
            return Ok(arc);
        }
        Ok(self.snapshot.read().clone())
    }

    /// Replace the whole document. The disk write happens before the
    /// snapshot swap, so a failed commit leaves readers on the old state.
    pub fn set_all(&self, doc: T) -> Result<()> {
        let _w = self.write_mu.lock();
        if self.auto_flush {
            let bytes = serde_json::to_vec_pretty(&doc)?;
            atomic_write(&self.path, &bytes)?;
        }
        *self.snapshot.write() = Arc::new(doc);
        Ok(())
    }

    /// Commit the in-memory snapshot to disk. A no-op companion for
    /// `auto_flush` stores, required for stores opened without it.
    pub fn flush(&self) -> Result<()> {
        let _w = self.write_mu.lock();
        let snap = self.snapshot.read().clone();
        let bytes = serde_json::to_vec_pretty(&*snap)?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Doc = BTreeMap<String, u32>;

    #[test]
    fn open_creates_missing_file_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();
        assert!(path.exists());
        assert!(store.get_all(false).unwrap().is_empty());
    }

    #[test]
    fn set_all_persists_and_get_all_force_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();

        let mut doc = Doc::new();
        doc.insert("a".into(), 1);
        store.set_all(doc).unwrap();

        // A second store over the same file sees the committed state.
        let other: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();
        assert_eq!(other.get_all(false).unwrap().get("a"), Some(&1));

        // Mutate through `other`, observe through `store` only after force.
        let mut doc = (*other.get_all(false).unwrap()).clone();
        doc.insert("b".into(), 2);
        other.set_all(doc).unwrap();
        assert!(store.get_all(false).unwrap().get("b").is_none());
        assert_eq!(store.get_all(true).unwrap().get("b"), Some(&2));
    }

    #[test]
    fn without_autoflush_disk_lags_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: MapFileStore<Doc> = MapFileStore::open(&path, false).unwrap();

        let mut doc = Doc::new();
        doc.insert("a".into(), 1);
        store.set_all(doc).unwrap();

        let fresh: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();
        assert!(fresh.get_all(false).unwrap().is_empty(), "not yet flushed");

        store.flush().unwrap();
        let fresh: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();
        assert_eq!(fresh.get_all(false).unwrap().get("a"), Some(&1));
    }

    #[test]
    fn corrupt_file_surfaces_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{ not json").unwrap();
        let res: Result<MapFileStore<Doc>> = MapFileStore::open(&path, true);
        assert!(res.is_err());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: MapFileStore<Doc> = MapFileStore::open(&path, true).unwrap();
        store.set_all(Doc::new()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
