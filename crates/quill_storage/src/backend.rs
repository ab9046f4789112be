//! Storage backend trait definition.

use crate::error::StorageResult;
use std::path::Path;

/// A low-level file-system adapter for quill.
///
/// Storage backends are **opaque path/byte stores**. They provide the
/// primitive operations the persistence layer composes into its crash-safe
/// write protocol. Quill owns all format interpretation — backends do not
/// understand journal lines, documents, or indexes.
///
/// # Invariants
///
/// - `write_file` replaces the full contents of the path
/// - `append_file` adds bytes at the end, creating the file if absent
/// - `rename` over an existing destination replaces it (POSIX semantics)
/// - after `sync_file`/`sync_dir` return, the named data/metadata is durable
/// - Backends must be `Send + Sync` for shared use
///
/// # Implementors
///
/// - [`super::FileBackend`] - For persistent storage
/// - [`super::MemoryBackend`] - For in-memory datastores and testing
pub trait StorageBackend: Send + Sync {
    /// Creates the directory and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if a component cannot be created.
    fn mkdir_p(&self, dir: &Path) -> StorageResult<()>;

    /// Returns true if a file exists at the path.
    fn exists(&self, path: &Path) -> bool;

    /// Reads the full contents of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Replaces the full contents of the file, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Appends bytes to the end of the file, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    fn append_file(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Renames `src` to `dst`, replacing `dst` if it exists.
    ///
    /// On POSIX file systems this is atomic, which the crash-safe write
    /// protocol relies on.
    ///
    /// # Errors
    ///
    /// Returns an error if `src` does not exist or the rename fails.
    fn rename(&self, src: &Path, dst: &Path) -> StorageResult<()>;

    /// Syncs the file's contents and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or synced.
    fn sync_file(&self, path: &Path) -> StorageResult<()>;

    /// Syncs the directory entry table to durable storage.
    ///
    /// Required after creating or renaming files so the new directory
    /// entries survive a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or synced.
    fn sync_dir(&self, dir: &Path) -> StorageResult<()>;

    /// Removes the file if it exists. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    fn remove_file(&self, path: &Path) -> StorageResult<()>;
}
