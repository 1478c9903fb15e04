//! Advisory lock machinery shared by the adapters.
//!
//! Two implementations of the same discipline:
//!
//! - [`file_lock`] takes `fs2` advisory locks on files under the store's
//!   `locks/` directory, giving cross-process exclusion on a shared
//!   filesystem.
//! - [`LockTable`] is an in-process table used by the memory adapter.
//!
//! Both are re-entrant within a thread: re-acquiring a held lock nests,
//! and only the outermost release actually frees it.

use crate::adapter::{LockGuard, LockScope};
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, ThreadId};

thread_local! {
    /// Locks held by the current thread, by fully-qualified key, with
    /// nesting depth. Keys are prefixed per store root so two adapters on
    /// different directories never alias.
    static HELD_FILE_LOCKS: RefCell<HashMap<String, usize>> = RefCell::new(HashMap::new());
}

/// Returns the lock file name for a scope.
///
/// Names are derived from the scope's identity; identifiers are sanitized
/// so opaque transaction ids and object keys are filesystem-safe.
pub(crate) fn lock_file_name(scope: &LockScope) -> String {
    match scope {
        LockScope::Global => "global.lock".to_string(),
        LockScope::Transaction(id) => format!("tx-{}.lock", sanitize(id)),
        LockScope::Object(key) => format!("obj-{}.lock", sanitize(key)),
    }
}

/// Sanitizes an opaque identifier into a filesystem-safe path component.
///
/// Alphanumerics, `-`, `_` and `.` pass through; everything else becomes
/// `%XX`. The mapping is injective, so distinct identifiers never collide.
pub(crate) fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Acquires an advisory file lock for `scope` under `locks_dir`.
///
/// `prefix` must uniquely identify the store (the canonical root path) so
/// the re-entrancy registry never confuses two stores.
pub(crate) fn file_lock(
    prefix: &str,
    locks_dir: &Path,
    scope: &LockScope,
    blocking: bool,
) -> StoreResult<LockGuard> {
    let file_name = lock_file_name(scope);
    let key = format!("{prefix}|{file_name}");

    // Re-entrant fast path: the current thread already holds this lock.
    let nested = HELD_FILE_LOCKS.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(depth) = held.get_mut(&key) {
            *depth += 1;
            true
        } else {
            false
        }
    });
    if nested {
        let key = key.clone();
        return Ok(LockGuard::new(move || { release_nested(&key); }));
    }

    fs::create_dir_all(locks_dir)?;
    let lock_path = locks_dir.join(&file_name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    if blocking {
        file.lock_exclusive()?;
    } else if file.try_lock_exclusive().is_err() {
        return Err(StoreError::lock_unavailable(
            scope.kind(),
            scope.name().to_string(),
        ));
    }

    HELD_FILE_LOCKS.with(|held| {
        held.borrow_mut().insert(key.clone(), 1);
    });

    Ok(LockGuard::new(move || {
        if release_nested(&key) {
            // Outermost release: drop the OS lock.
            let _ = file.unlock();
        }
    }))
}

/// Decrements the nesting depth for `key`; returns true when the lock is
/// fully released.
fn release_nested(key: &str) -> bool {
    HELD_FILE_LOCKS.with(|held| {
        let mut held = held.borrow_mut();
        match held.get_mut(key) {
            Some(depth) if *depth > 1 => {
                *depth -= 1;
                false
            }
            Some(_) => {
                held.remove(key);
                true
            }
            None => false,
        }
    })
}

/// Inverts [`sanitize`].
///
/// Returns `None` for malformed escapes, which indicates a foreign file in
/// the store directory rather than one of ours.
pub(crate) fn desanitize(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// State of one held in-process lock.
struct Holder {
    thread: ThreadId,
    depth: usize,
}

/// An in-process named lock table with blocking waits and per-thread
/// re-entrancy.
///
/// Shared between memory adapter clones via `Arc`, so every "process"
/// attached to the same store contends on the same table.
pub(crate) struct LockTable {
    held: Mutex<HashMap<String, Holder>>,
    available: Condvar,
}

impl LockTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(HashMap::new()),
            available: Condvar::new(),
        })
    }

    /// Acquires the named lock for the current thread.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        scope: &LockScope,
        blocking: bool,
    ) -> StoreResult<LockGuard> {
        let name = lock_file_name(scope);
        let me = thread::current().id();

        let mut held = self.held.lock();
        loop {
            match held.get_mut(&name) {
                None => {
                    held.insert(name.clone(), Holder { thread: me, depth: 1 });
                    break;
                }
                Some(holder) if holder.thread == me => {
                    holder.depth += 1;
                    break;
                }
                Some(_) if blocking => {
                    self.available.wait(&mut held);
                }
                Some(_) => {
                    return Err(StoreError::lock_unavailable(
                        scope.kind(),
                        scope.name().to_string(),
                    ));
                }
            }
        }
        drop(held);

        let table = Arc::clone(self);
        Ok(LockGuard::new(move || table.release(&name)))
    }

    fn release(&self, name: &str) {
        let mut held = self.held.lock();
        if let Some(holder) = held.get_mut(name) {
            if holder.depth > 1 {
                holder.depth -= 1;
            } else {
                held.remove(name);
                self.available.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockKind;
    use tempfile::tempdir;

    #[test]
    fn sanitize_passthrough_and_escape() {
        assert_eq!(sanitize("tr-1_a.b"), "tr-1_a.b");
        assert_eq!(sanitize("user/17"), "user%2F17");
        assert_eq!(sanitize("a b"), "a%20b");
    }

    #[test]
    fn sanitize_roundtrip() {
        for raw in ["tr1", "user/17", "a b%c", "übergang/9"] {
            assert_eq!(desanitize(&sanitize(raw)).as_deref(), Some(raw));
        }
        assert!(desanitize("%zz").is_none());
        assert!(desanitize("%2").is_none());
    }

    #[test]
    fn lock_file_names() {
        assert_eq!(lock_file_name(&LockScope::Global), "global.lock");
        assert_eq!(
            lock_file_name(&LockScope::Transaction("tr1".into())),
            "tx-tr1.lock"
        );
        assert_eq!(
            lock_file_name(&LockScope::Object("user/1".into())),
            "obj-user%2F1.lock"
        );
    }

    #[test]
    fn file_lock_is_reentrant() {
        let dir = tempdir().unwrap();
        let scope = LockScope::Transaction("tr1".into());

        let outer = file_lock("t", dir.path(), &scope, false).unwrap();
        let inner = file_lock("t", dir.path(), &scope, false).unwrap();
        drop(inner);
        // Still held by the outer guard after the inner release.
        drop(outer);

        let again = file_lock("t", dir.path(), &scope, false).unwrap();
        drop(again);
    }

    #[test]
    fn table_nonblocking_conflict_across_threads() {
        let table = LockTable::new();
        let scope = LockScope::Global;

        let guard = table.acquire(&scope, false).unwrap();

        let table2 = Arc::clone(&table);
        let result = std::thread::spawn(move || {
            table2
                .acquire(&LockScope::Global, false)
                .map(|_| ())
                .map_err(|e| matches!(e, StoreError::LockUnavailable { kind: LockKind::Global, .. }))
        })
        .join()
        .unwrap();
        assert_eq!(result.unwrap_err(), true);

        drop(guard);
        let reacquired = table.acquire(&scope, false);
        assert!(reacquired.is_ok());
    }

    #[test]
    fn table_is_reentrant_on_same_thread() {
        let table = LockTable::new();
        let scope = LockScope::Object("user/1".into());

        let outer = table.acquire(&scope, false).unwrap();
        let inner = table.acquire(&scope, false).unwrap();
        drop(outer);

        // Inner guard still holds the lock.
        let table2 = Arc::clone(&table);
        let contended = std::thread::spawn(move || {
            table2
                .acquire(&LockScope::Object("user/1".into()), false)
                .is_err()
        })
        .join()
        .unwrap();
        assert!(contended);

        drop(inner);
    }

    #[test]
    fn table_blocking_waits_for_release() {
        let table = LockTable::new();
        let guard = table.acquire(&LockScope::Global, false).unwrap();

        let table2 = Arc::clone(&table);
        let waiter = std::thread::spawn(move || {
            let _guard = table2.acquire(&LockScope::Global, true).unwrap();
            true
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
