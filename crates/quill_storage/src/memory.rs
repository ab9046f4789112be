//! In-memory backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A backend over an in-process path→bytes map.
///
/// Used by in-memory datastores and tests. All durability calls are
/// no-ops; rename and append follow the same semantics as the file
/// backend so the persistence layer behaves identically on both.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn mkdir_p(&self, _dir: &Path) -> StorageResult<()> {
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.files.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn append_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.files
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path) -> StorageResult<()> {
        let mut files = self.files.lock();
        match files.remove(src) {
            Some(data) => {
                files.insert(dst.to_path_buf(), data);
                Ok(())
            }
            None => Err(StorageError::not_found(src)),
        }
    }

    fn sync_file(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }

    fn sync_dir(&self, _dir: &Path) -> StorageResult<()> {
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.files.lock().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_fails() {
        let mem = MemoryBackend::new();
        assert!(mem.read_file(Path::new("absent")).is_err());
        assert!(!mem.exists(Path::new("absent")));
    }

    #[test]
    fn write_then_read() {
        let mem = MemoryBackend::new();
        mem.write_file(Path::new("f"), b"abc").unwrap();
        assert_eq!(mem.read_file(Path::new("f")).unwrap(), b"abc");
    }

    #[test]
    fn append_creates_and_extends() {
        let mem = MemoryBackend::new();
        mem.append_file(Path::new("f"), b"a").unwrap();
        mem.append_file(Path::new("f"), b"b").unwrap();
        assert_eq!(mem.read_file(Path::new("f")).unwrap(), b"ab");
    }

    #[test]
    fn rename_moves_contents() {
        let mem = MemoryBackend::new();
        mem.write_file(Path::new("f~"), b"data").unwrap();
        mem.rename(Path::new("f~"), Path::new("f")).unwrap();

        assert!(!mem.exists(Path::new("f~")));
        assert_eq!(mem.read_file(Path::new("f")).unwrap(), b"data");
    }

    #[test]
    fn rename_missing_fails() {
        let mem = MemoryBackend::new();
        assert!(mem.rename(Path::new("a"), Path::new("b")).is_err());
    }
}
