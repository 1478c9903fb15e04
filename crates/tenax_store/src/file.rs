//! File-based persistence adapter.
//!
//! This adapter stores transactions on a shared filesystem:
//!
//! ```text
//! <root>/
//! ├─ transactions/
//! │  └─ <tx_id>/              # sanitized transaction identifier
//! │     └─ <version>/         # one directory per section
//! │        ├─ information.json
//! │        ├─ entry-00001.json
//! │        └─ entry-00002.json
//! └─ locks/
//!    ├─ global.lock
//!    ├─ tx-<tx_id>.lock
//!    └─ obj-<object_key>.lock
//! ```
//!
//! Locks are `fs2` advisory file locks, so processes on the same machine
//! (or a correctly shared filesystem) cooperate. Entry files are written
//! with the write-then-rename pattern and the section directory is fsynced
//! afterwards, so a crash never leaves a half-written record visible.

use crate::adapter::{LockGuard, LockScope, PersistenceAdapter, SectionRef};
use crate::error::{StoreError, StoreResult};
use crate::lock::{self, desanitize, sanitize};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const TRANSACTIONS_DIR: &str = "transactions";
const LOCKS_DIR: &str = "locks";
const INFORMATION_FILE: &str = "information.json";
const ENTRY_PREFIX: &str = "entry-";

/// An entry waiting in the pending queue.
#[derive(Debug)]
struct Queued {
    section: SectionRef,
    position: u64,
    record: Value,
}

/// A durable, file-backed persistence adapter.
///
/// Safe to share across threads; the pending queue is internally locked.
/// Two adapters opened on the same root directory — from the same or
/// different processes — see the same store and contend on the same
/// advisory locks.
#[derive(Debug)]
pub struct FileAdapter {
    root: PathBuf,
    /// Canonical root, used to key the thread re-entrancy registry.
    lock_prefix: String,
    queue: Mutex<Vec<Queued>>,
}

impl FileAdapter {
    /// Opens or creates a store rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory structure cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path.join(TRANSACTIONS_DIR))?;
        fs::create_dir_all(path.join(LOCKS_DIR))?;
        let lock_prefix = fs::canonicalize(path)?.to_string_lossy().into_owned();

        Ok(Self {
            root: path.to_path_buf(),
            lock_prefix,
            queue: Mutex::new(Vec::new()),
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn transactions_dir(&self) -> PathBuf {
        self.root.join(TRANSACTIONS_DIR)
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    fn transaction_dir(&self, transaction_id: &str) -> PathBuf {
        self.transactions_dir().join(sanitize(transaction_id))
    }

    fn section_dir(&self, section: &SectionRef) -> PathBuf {
        self.transaction_dir(&section.transaction_id)
            .join(section.version.to_string())
    }

    /// Writes `record` to `path` atomically: temp file, fsync, rename.
    fn write_record(path: &Path, record: &Value) -> StoreResult<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_record(path: &Path) -> StoreResult<Value> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| StoreError::corrupt(format!("{}: {e}", path.display())))
    }

    /// Number of entry files already persisted in a section directory.
    fn persisted_entry_count(dir: &Path) -> StoreResult<u64> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for item in fs::read_dir(dir)? {
            let name = item?.file_name();
            if name.to_string_lossy().starts_with(ENTRY_PREFIX) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Ensures the section directory and its information record exist.
    fn prepare_section(&self, section: &SectionRef) -> StoreResult<PathBuf> {
        let dir = self.section_dir(section);
        fs::create_dir_all(&dir)?;

        let info_path = dir.join(INFORMATION_FILE);
        if !info_path.exists() {
            let info = json!({
                "transaction_identifier": section.transaction_id,
                "savepoint": section.savepoint(),
                "savepoint_version": section.version,
            });
            Self::write_record(&info_path, &info)?;
        }
        Ok(dir)
    }

    #[cfg(unix)]
    fn sync_dir(path: &Path) -> StoreResult<()> {
        if path.exists() {
            File::open(path)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_path: &Path) -> StoreResult<()> {
        // NTFS journaling covers directory metadata durability.
        Ok(())
    }
}

impl PersistenceAdapter for FileAdapter {
    fn enqueue(&self, section: &SectionRef, position: u64, record: Value) -> StoreResult<()> {
        let mut queue = self.queue.lock();
        if queue
            .iter()
            .any(|q| q.section == *section && q.position == position)
        {
            return Err(StoreError::AlreadyEnqueued {
                savepoint: section.savepoint(),
                position,
            });
        }
        queue.push(Queued {
            section: section.clone(),
            position,
            record,
        });
        Ok(())
    }

    fn persist(&self) -> StoreResult<Vec<u64>> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return Ok(Vec::new());
        }

        // One transaction lock per distinct transaction, held until the
        // queue is fully flushed. Re-entrant, so a caller already holding
        // the lock nests instead of deadlocking.
        let mut tx_guards: Vec<(String, LockGuard)> = Vec::new();
        for queued in queue.iter() {
            if !tx_guards
                .iter()
                .any(|(id, _)| id == &queued.section.transaction_id)
            {
                let scope = LockScope::Transaction(queued.section.transaction_id.clone());
                let guard = self.lock(&scope, true)?;
                tx_guards.push((queued.section.transaction_id.clone(), guard));
            }
        }

        let mut ids = Vec::with_capacity(queue.len());
        let mut touched_dirs: Vec<PathBuf> = Vec::new();
        for queued in queue.iter() {
            let dir = self.prepare_section(&queued.section)?;
            let entry_id = Self::persisted_entry_count(&dir)? + 1;
            let path = dir.join(format!("{ENTRY_PREFIX}{entry_id:05}.json"));
            Self::write_record(&path, &queued.record)?;
            ids.push(entry_id);
            if !touched_dirs.contains(&dir) {
                touched_dirs.push(dir);
            }
        }
        for dir in touched_dirs {
            Self::sync_dir(&dir)?;
        }

        queue.clear();
        Ok(ids)
    }

    fn transaction_identifiers(&self) -> StoreResult<Vec<String>> {
        let _guard = self.lock(&LockScope::Global, true)?;

        let mut ids = Vec::new();
        for item in fs::read_dir(self.transactions_dir())? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = desanitize(&item.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn savepoint_versions(&self, transaction_id: &str) -> StoreResult<Vec<u64>> {
        let scope = LockScope::Transaction(transaction_id.to_string());
        let _guard = self.lock(&scope, true)?;

        let dir = self.transaction_dir(transaction_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for item in fs::read_dir(&dir)? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            if let Ok(version) = item.file_name().to_string_lossy().parse::<u64>() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn log_entries(&self, section: &SectionRef) -> StoreResult<Vec<(u64, Value)>> {
        let scope = LockScope::Transaction(section.transaction_id.clone());
        let _guard = self.lock(&scope, true)?;

        let dir = self.section_dir(section);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in fs::read_dir(&dir)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            let Some(id_part) = name
                .strip_prefix(ENTRY_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let entry_id: u64 = id_part
                .parse()
                .map_err(|_| StoreError::corrupt(format!("bad entry file name: {name}")))?;
            entries.push((entry_id, Self::read_record(&item.path())?));
        }
        entries.sort_by_key(|(id, _)| *id);
        Ok(entries)
    }

    fn reset_transaction(&self, transaction_id: &str) -> StoreResult<()> {
        let scope = LockScope::Transaction(transaction_id.to_string());
        let _guard = self.lock(&scope, true)?;

        let dir = self.transaction_dir(transaction_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            Self::sync_dir(&self.transactions_dir())?;
        }

        // Drop any queued entries that would resurrect the transaction.
        self.queue
            .lock()
            .retain(|q| q.section.transaction_id != transaction_id);
        Ok(())
    }

    fn lock(&self, scope: &LockScope, blocking: bool) -> StoreResult<LockGuard> {
        lock::file_lock(&self.lock_prefix, &self.locks_dir(), scope, blocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(n: i64) -> Value {
        json!({ "kind": "test", "n": n })
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let adapter = FileAdapter::open(&root).unwrap();

        assert!(root.join("transactions").is_dir());
        assert!(root.join("locks").is_dir());
        assert_eq!(adapter.root(), root);
    }

    #[test]
    fn persist_assigns_sequential_entry_ids() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("tr1", 1);

        adapter.enqueue(&section, 0, record(1)).unwrap();
        adapter.enqueue(&section, 1, record(2)).unwrap();
        let ids = adapter.persist().unwrap();
        assert_eq!(ids, vec![1, 2]);

        adapter.enqueue(&section, 2, record(3)).unwrap();
        let ids = adapter.persist().unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn persist_empty_queue_is_idempotent() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        assert!(adapter.persist().unwrap().is_empty());
        assert!(adapter.persist().unwrap().is_empty());
    }

    #[test]
    fn double_enqueue_fails() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("tr1", 1);

        adapter.enqueue(&section, 0, record(1)).unwrap();
        let result = adapter.enqueue(&section, 0, record(1));
        assert!(matches!(result, Err(StoreError::AlreadyEnqueued { .. })));
    }

    #[test]
    fn log_entries_roundtrip() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("tr1", 1);

        adapter.enqueue(&section, 0, record(10)).unwrap();
        adapter.enqueue(&section, 1, record(20)).unwrap();
        adapter.persist().unwrap();

        let entries = adapter.log_entries(&section).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (1, record(10)));
        assert_eq!(entries[1], (2, record(20)));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let section = SectionRef::new("tr1", 1);

        {
            let adapter = FileAdapter::open(dir.path()).unwrap();
            adapter.enqueue(&section, 0, record(7)).unwrap();
            adapter.persist().unwrap();
        }

        let adapter = FileAdapter::open(dir.path()).unwrap();
        let entries = adapter.log_entries(&section).unwrap();
        assert_eq!(entries, vec![(1, record(7))]);
        assert_eq!(adapter.savepoint_versions("tr1").unwrap(), vec![1]);
        assert_eq!(
            adapter.transaction_identifiers().unwrap(),
            vec!["tr1".to_string()]
        );
    }

    #[test]
    fn sections_are_separate() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();

        adapter
            .enqueue(&SectionRef::new("tr1", 1), 0, record(1))
            .unwrap();
        adapter
            .enqueue(&SectionRef::new("tr1", 2), 0, record(2))
            .unwrap();
        adapter.persist().unwrap();

        assert_eq!(adapter.savepoint_versions("tr1").unwrap(), vec![1, 2]);
        assert_eq!(
            adapter.log_entries(&SectionRef::new("tr1", 2)).unwrap(),
            vec![(1, record(2))]
        );
    }

    #[test]
    fn reset_removes_transaction() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("tr1", 1);

        adapter.enqueue(&section, 0, record(1)).unwrap();
        adapter.persist().unwrap();
        adapter.reset_transaction("tr1").unwrap();

        assert!(adapter.transaction_identifiers().unwrap().is_empty());
        assert!(adapter.log_entries(&section).unwrap().is_empty());
    }

    #[test]
    fn reset_drops_queued_entries() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();

        adapter
            .enqueue(&SectionRef::new("tr1", 1), 0, record(1))
            .unwrap();
        adapter
            .enqueue(&SectionRef::new("tr2", 1), 0, record(2))
            .unwrap();
        adapter.reset_transaction("tr1").unwrap();
        adapter.persist().unwrap();

        assert_eq!(
            adapter.transaction_identifiers().unwrap(),
            vec!["tr2".to_string()]
        );
    }

    #[test]
    fn opaque_identifiers_are_sanitized() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("job/2024 #5", 1);

        adapter.enqueue(&section, 0, record(1)).unwrap();
        adapter.persist().unwrap();

        assert_eq!(
            adapter.transaction_identifiers().unwrap(),
            vec!["job/2024 #5".to_string()]
        );
        assert_eq!(adapter.savepoint_versions("job/2024 #5").unwrap(), vec![1]);
    }

    #[test]
    fn information_record_written_once() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let section = SectionRef::new("tr1", 4);

        adapter.enqueue(&section, 0, record(1)).unwrap();
        adapter.persist().unwrap();

        let info_path = adapter.section_dir(&section).join("information.json");
        let info = FileAdapter::read_record(&info_path).unwrap();
        assert_eq!(info["transaction_identifier"], "tr1");
        assert_eq!(info["savepoint"], "tr1/4");
        assert_eq!(info["savepoint_version"], 4);
    }

    #[test]
    fn nonblocking_object_lock_conflict() {
        let dir = tempdir().unwrap();
        let adapter = FileAdapter::open(dir.path()).unwrap();
        let scope = LockScope::Object("user/1".into());

        let _guard = adapter.lock(&scope, false).unwrap();

        // A second process is modeled by a second adapter on another
        // thread (the same thread would nest re-entrantly).
        let root = dir.path().to_path_buf();
        let conflicted = std::thread::spawn(move || {
            let other = FileAdapter::open(&root).unwrap();
            other
                .lock(&LockScope::Object("user/1".into()), false)
                .is_err()
        })
        .join()
        .unwrap();
        assert!(conflicted);
    }
}
