//! Per-path reader/writer locks shared by every session of a daemon
//!
//! GET holds a shared lease for the whole transfer, PUT an exclusive one from
//! truncation to the last byte, so readers never observe a half-written file
//! and two uploads to the same path never interleave.
//!
//! Entries are reference counted: the map only keeps weak references, and the
//! lease that drops the last strong reference removes its entry. Removal and
//! creation both happen under the map mutex, so an acquisition in progress
//! always finds either the live lock or nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Entries = Mutex<HashMap<PathBuf, Weak<RwLock<()>>>>;

#[derive(Clone, Default)]
pub struct PathLocks {
    entries: Arc<Entries>,
}

/// One strong reference to a registry entry; evicts the entry when it is the last.
struct EntryRef {
    path: PathBuf,
    lock: Option<Arc<RwLock<()>>>,
    entries: Arc<Entries>,
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        let mut map = self.entries.lock();
        if let Some(lock) = self.lock.take() {
            if Arc::strong_count(&lock) == 1 {
                let ours = map
                    .get(&self.path)
                    .is_some_and(|w| w.as_ptr() == Arc::as_ptr(&lock));
                if ours {
                    map.remove(&self.path);
                }
            }
            // Released while the map is still locked so the count seen above stays exact
            drop(lock);
        }
    }
}

/// Shared (read) hold on a path. Dropping it releases the lock.
pub struct ReadLease {
    // Field order matters: the guard's reference must go before the entry's
    _guard: OwnedRwLockReadGuard<()>,
    _entry: EntryRef,
}

/// Exclusive (write) hold on a path. Dropping it releases the lock.
pub struct WriteLease {
    _guard: OwnedRwLockWriteGuard<()>,
    _entry: EntryRef,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `path` plus the entry reference that keeps it registered.
    fn entry(&self, path: &Path) -> (Arc<RwLock<()>>, EntryRef) {
        let mut map = self.entries.lock();
        let lock = match map.get(path).and_then(Weak::upgrade) {
            Some(l) => l,
            None => {
                let l = Arc::new(RwLock::new(()));
                map.insert(path.to_path_buf(), Arc::downgrade(&l));
                l
            }
        };
        let entry = EntryRef {
            path: path.to_path_buf(),
            lock: Some(lock.clone()),
            entries: self.entries.clone(),
        };
        (lock, entry)
    }

    /// Acquire `path` in shared mode, waiting while a writer holds it.
    pub async fn read(&self, path: &Path) -> ReadLease {
        let (lock, entry) = self.entry(path);
        let guard = lock.read_owned().await;
        ReadLease {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Acquire `path` in exclusive mode, waiting for all readers and writers to leave.
    pub async fn write(&self, path: &Path) -> WriteLease {
        let (lock, entry) = self.entry(path);
        let guard = lock.write_owned().await;
        WriteLease {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Number of paths with a live lease or a pending acquisition.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_readers_share() {
        let locks = PathLocks::new();
        let p = Path::new("/data/file.bin");
        let a = locks.read(p).await;
        let b = timeout(SHORT, locks.read(p)).await;
        assert!(b.is_ok(), "second reader must not wait");
        assert_eq!(locks.len(), 1);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_writer_excludes_readers_and_writers() {
        let locks = PathLocks::new();
        let p = Path::new("/data/file.bin");
        let w = locks.write(p).await;
        assert!(timeout(SHORT, locks.read(p)).await.is_err());
        assert!(timeout(SHORT, locks.write(p)).await.is_err());
        drop(w);
        assert!(timeout(SHORT, locks.read(p)).await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_paths_independent() {
        let locks = PathLocks::new();
        let _w = locks.write(Path::new("/a")).await;
        assert!(timeout(SHORT, locks.write(Path::new("/b"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_entry_evicted_after_last_lease() {
        let locks = PathLocks::new();
        let p = Path::new("/data/x");
        let r1 = locks.read(p).await;
        let r2 = locks.read(p).await;
        drop(r1);
        assert_eq!(locks.len(), 1);
        drop(r2);
        assert!(locks.is_empty());
        assert!(locks.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks = PathLocks::new();
        let p = Path::new("/data/z");
        let w = locks.write(p).await;
        assert!(timeout(SHORT, locks.write(p)).await.is_err());
        drop(w);
        assert!(locks.is_empty());
        assert!(timeout(SHORT, locks.read(p)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiter_keeps_entry_alive() {
        let locks = PathLocks::new();
        let p = PathBuf::from("/data/y");
        let w = locks.write(&p).await;

        let waiter = {
            let locks = locks.clone();
            let p = p.clone();
            tokio::spawn(async move {
                let _r = locks.read(&p).await;
            })
        };
        tokio::time::sleep(SHORT).await;
        assert_eq!(locks.len(), 1);
        drop(w);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
