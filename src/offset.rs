//! Process-local, monotonic per-path byte offset table. Owned by the
//! supervisor; not persisted across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct OffsetTable {
    inner: Mutex<HashMap<PathBuf, u64>>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 if the path has never been observed.
    pub fn get(&self, path: &Path) -> u64 {
        self.inner.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Moves the offset forward only; a smaller value is ignored so the
    /// invariant "byte count is monotonically nondecreasing" always holds.
    pub fn set(&self, path: &Path, offset: u64) {
        let mut guard = self.inner.lock().unwrap();
        let entry = guard.entry(path.to_path_buf()).or_insert(0);
        if offset > *entry {
            *entry = offset;
        }
    }

    /// Forces the offset back to zero regardless of monotonicity, for the
    /// truncation case where the file shrank since it was last read.
    pub fn reset(&self, path: &Path) {
        self.inner.lock().unwrap().insert(path.to_path_buf(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_path_defaults_to_zero() {
        let table = OffsetTable::new();
        assert_eq!(table.get(Path::new("/tmp/x.jsonl")), 0);
    }

    #[test]
    fn set_is_monotonic() {
        let table = OffsetTable::new();
        let p = Path::new("/tmp/x.jsonl");
        table.set(p, 100);
        table.set(p, 40);
        assert_eq!(table.get(p), 100);
    }

    #[test]
    fn reset_forces_to_zero() {
        let table = OffsetTable::new();
        let p = Path::new("/tmp/x.jsonl");
        table.set(p, 500);
        table.reset(p);
        assert_eq!(table.get(p), 0);
    }
}
