//! Process-wide registry of open stores.
//!
//! The engine provides no cross-handle locking; the registry exists only to
//! refuse a second in-process open of one file and to guarantee the entry
//! is released when the handle is dropped without an explicit close.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use kardex_common::{Result, StoreError};

static OPEN_STORES: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Registry entry for one open store. Releases itself on drop.
#[derive(Debug)]
pub(crate) struct RegistryEntry {
    path: PathBuf,
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        OPEN_STORES.lock().remove(&self.path);
    }
}

/// The registry key for a path: its canonical form when resolvable, the
/// path as given otherwise.
fn registry_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Returns true if the path is registered as open in this process.
pub(crate) fn is_open(path: &Path) -> bool {
    OPEN_STORES.lock().contains(&registry_key(path))
}

/// Registers a path as open, failing if it already is.
pub(crate) fn acquire(path: &Path) -> Result<RegistryEntry> {
    let key = registry_key(path);
    let mut open = OPEN_STORES.lock();
    if !open.insert(key.clone()) {
        return Err(StoreError::DatabaseAlreadyOpened(
            path.display().to_string(),
        ));
    }
    Ok(RegistryEntry { path: key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_release_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.db");
        std::fs::write(&path, b"").unwrap();

        assert!(!is_open(&path));
        let entry = acquire(&path).unwrap();
        assert!(is_open(&path));

        assert!(matches!(
            acquire(&path),
            Err(StoreError::DatabaseAlreadyOpened(_))
        ));

        drop(entry);
        assert!(!is_open(&path));
        let _entry = acquire(&path).unwrap();
    }

    #[test]
    fn test_distinct_paths_coexist() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.db");
        let b = dir.path().join("b.db");

        let _ea = acquire(&a).unwrap();
        let _eb = acquire(&b).unwrap();
        assert!(is_open(&a));
        assert!(is_open(&b));
    }
}
