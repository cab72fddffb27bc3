use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of a mutating operation on one repository.
pub type RepositoryGuard = OwnedMutexGuard<()>;

/// Serializes mutating operations per repository path.
///
/// Guards are owned, so the facade can move one into the blocking task
/// doing the work; the lock is released when the git work ends rather than
/// when the caller stops waiting.
#[derive(Debug, Default)]
pub struct RepositoryLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `path`. Entries nobody holds or waits on are dropped first,
    /// so the map only ever holds repositories in use.
    fn entry(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let key = lock_key(path);
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key).or_default())
    }

    /// Waits until no other mutation of `path` is running.
    pub async fn acquire(&self, path: &Path) -> RepositoryGuard {
        self.entry(path).lock_owned().await
    }

    /// Takes the lock only if it is free.
    pub fn try_acquire(&self, path: &Path) -> Option<RepositoryGuard> {
        self.entry(path).try_lock_owned().ok()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalizes `path` so aliases of one directory share a lock.
///
/// The path may not exist yet (clone and init targets), so the nearest
/// existing ancestor is canonicalized and the rest appended.
pub fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut rest: Vec<Component<'_>> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut key = canonical;
            for component in rest.iter().rev() {
                match component {
                    Component::ParentDir => {
                        key.pop();
                    }
                    Component::CurDir => {}
                    other => key.push(other.as_os_str()),
                }
            }
            return key;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                rest.push(last);
                existing = parent;
            }
            _ => return absolute,
        }
    }
}
