//! Real file-system backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A backend over the operating system's file APIs.
///
/// Data survives process restarts. Durability calls map to `sync_all`,
/// which is the strongest guarantee the OS offers.
///
/// # Example
///
/// ```no_run
/// use quill_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let fs = FileBackend::new();
/// fs.append_file(Path::new("journal.db"), b"{\"_id\":\"a\"}\n").unwrap();
/// fs.sync_file(Path::new("journal.db")).unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBackend;

impl FileBackend {
    /// Creates a new file backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for FileBackend {
    fn mkdir_p(&self, dir: &Path) -> StorageResult<()> {
        std::fs::create_dir_all(dir)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        std::fs::write(path, data)?;
        Ok(())
    }

    fn append_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path) -> StorageResult<()> {
        std::fs::rename(src, dst)?;
        Ok(())
    }

    fn sync_file(&self, path: &Path) -> StorageResult<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.sync_all()?;
        Ok(())
    }

    fn sync_dir(&self, dir: &Path) -> StorageResult<()> {
        // Directories are opened read-only for fsync. Some platforms
        // (notably Windows) refuse to open directories; treat that as a
        // successful no-op since rename durability is handled by the OS
        // there.
        match File::open(dir) {
            Ok(handle) => {
                handle.sync_all()?;
                Ok(())
            }
            Err(_) if cfg!(windows) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let fs = FileBackend::new();

        fs.write_file(&path, b"hello").unwrap();
        assert!(fs.exists(&path));
        assert_eq!(fs.read_file(&path).unwrap(), b"hello");
    }

    #[test]
    fn append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let fs = FileBackend::new();

        fs.append_file(&path, b"one\n").unwrap();
        fs.append_file(&path, b"two\n").unwrap();
        assert_eq!(fs.read_file(&path).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn rename_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.db~");
        let dst = dir.path().join("data.db");
        let fs = FileBackend::new();

        fs.write_file(&dst, b"old").unwrap();
        fs.write_file(&src, b"new").unwrap();
        fs.rename(&src, &dst).unwrap();

        assert!(!fs.exists(&src));
        assert_eq!(fs.read_file(&dst).unwrap(), b"new");
    }

    #[test]
    fn mkdir_p_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        let fs = FileBackend::new();

        fs.mkdir_p(&deep).unwrap();
        assert!(deep.is_dir());
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileBackend::new();
        fs.remove_file(&dir.path().join("absent")).unwrap();
    }

    #[test]
    fn sync_file_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let fs = FileBackend::new();

        fs.write_file(&path, b"x").unwrap();
        fs.sync_file(&path).unwrap();
        fs.sync_dir(dir.path()).unwrap();
    }
}
