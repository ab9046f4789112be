//! Journal persistence and recovery.
//!
//! The datafile is an append-only journal: one record per line. Loading
//! folds the journal (last version per `_id` wins, tombstones delete,
//! index descriptors register), tolerating unreadable lines up to a
//! configured ratio. Rewrites go through a crash-safe temp-and-rename
//! protocol, so a crash at any step leaves either the old or the new
//! complete file on disk.

use crate::error::{DbError, DbResult};
use crate::index::SharedDoc;
use crate::options::{DatastoreOptions, SerializationHook};
use quill_codec::{deserialize, serialize, Value};
use quill_storage::StorageBackend;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A declared index: the journal form is
/// `{"$$indexCreated": {"fieldName": ..., "unique": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Indexed dot-path.
    pub field: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The folded state of a journal.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Live documents, one per `_id`.
    pub docs: Vec<Value>,
    /// Declared indexes, in declaration order.
    pub indexes: Vec<IndexDef>,
    /// Number of unreadable records.
    pub corrupt: usize,
    /// Total number of records.
    pub total: usize,
}

/// Owns the journal file of one datastore.
pub struct Persistence {
    filename: PathBuf,
    temp_filename: PathBuf,
    backend: Arc<dyn StorageBackend>,
    in_memory: bool,
    corrupt_alert_threshold: f64,
    after_serialization: Option<SerializationHook>,
    before_deserialization: Option<SerializationHook>,
}

impl Persistence {
    /// Creates the persistence layer for a datastore.
    ///
    /// The options must already be validated (see
    /// [`DatastoreOptions::validate`]).
    pub fn new(options: &DatastoreOptions, backend: Arc<dyn StorageBackend>) -> Self {
        let filename = options
            .filename
            .clone()
            .unwrap_or_else(|| PathBuf::from("quill.db"));
        let mut temp = filename.clone().into_os_string();
        temp.push("~");

        Self {
            filename,
            temp_filename: PathBuf::from(temp),
            backend,
            in_memory: options.in_memory_only,
            corrupt_alert_threshold: options.corrupt_alert_threshold,
            after_serialization: options.after_serialization.clone(),
            before_deserialization: options.before_deserialization.clone(),
        }
    }

    /// Path of the journal file.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    fn encode_line(&self, value: &Value) -> DbResult<String> {
        let line = serialize(value)?;
        Ok(match &self.after_serialization {
            Some(hook) => hook(&line),
            None => line,
        })
    }

    fn decode_line(&self, raw: &str) -> DbResult<Value> {
        let line = match &self.before_deserialization {
            Some(hook) => hook(raw),
            None => raw.to_string(),
        };
        Ok(deserialize(&line)?)
    }

    fn dir(&self) -> &Path {
        self.filename
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    /// Ensures a journal file exists, recovering from a crash that
    /// happened between the temp write and the rename.
    fn ensure_datafile_integrity(&self) -> DbResult<()> {
        if self.backend.exists(&self.filename) {
            return Ok(());
        }
        if self.backend.exists(&self.temp_filename) {
            info!(file = %self.filename.display(), "recovering datafile from crash-safe backup");
            self.backend.rename(&self.temp_filename, &self.filename)?;
            return Ok(());
        }
        self.backend.write_file(&self.filename, b"")?;
        Ok(())
    }

    /// Reads and folds the journal.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` when the ratio of unreadable records exceeds
    /// the configured threshold, or an adapter error on I/O failure.
    pub fn load_file(&self) -> DbResult<LoadResult> {
        if self.in_memory {
            return Ok(LoadResult::default());
        }

        self.backend.mkdir_p(self.dir())?;
        self.ensure_datafile_integrity()?;

        let raw = self.backend.read_file(&self.filename)?;
        let raw = String::from_utf8_lossy(&raw);
        let lines: Vec<&str> = raw.split('\n').collect();

        let mut total = lines.len();
        if lines.last().is_some_and(|l| l.is_empty()) {
            total -= 1;
        }

        let mut corrupt = 0usize;
        let mut docs: BTreeMap<String, Value> = BTreeMap::new();
        let mut indexes: Vec<IndexDef> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if line.is_empty() {
                // Only the final blank line (from the trailing newline) is
                // expected; any other blank is an unreadable record.
                if i + 1 != lines.len() {
                    corrupt += 1;
                }
                continue;
            }
            match self.decode_line(line) {
                Ok(record) => fold_record(record, &mut docs, &mut indexes),
                Err(_) => corrupt += 1,
            }
        }

        #[allow(clippy::cast_precision_loss)]
        if total > 0 && corrupt as f64 / total as f64 > self.corrupt_alert_threshold {
            warn!(
                corrupt,
                total,
                file = %self.filename.display(),
                "datafile exceeds corruption tolerance"
            );
            return Err(DbError::Corruption {
                corrupt,
                total,
                threshold: self.corrupt_alert_threshold,
            });
        }

        debug!(
            docs = docs.len(),
            indexes = indexes.len(),
            corrupt,
            total,
            "loaded datafile"
        );

        Ok(LoadResult {
            docs: docs.into_values().collect(),
            indexes,
            corrupt,
            total,
        })
    }

    /// Rewrites the journal to contain only the live documents and the
    /// declared non-`_id` index descriptors (compaction), using the
    /// crash-safe write protocol.
    ///
    /// # Errors
    ///
    /// Returns serialization or adapter errors.
    pub fn persist_cached_database(
        &self,
        docs: &[SharedDoc],
        indexes: &[IndexDef],
    ) -> DbResult<()> {
        if self.in_memory {
            return Ok(());
        }

        let mut out = String::new();
        for doc in docs {
            out.push_str(&self.encode_line(doc)?);
            out.push('\n');
        }
        for def in indexes {
            if def.field == "_id" {
                continue;
            }
            out.push_str(&self.encode_line(&index_created_record(def))?);
            out.push('\n');
        }

        self.crash_safe_write(out.as_bytes())?;
        debug!(
            docs = docs.len(),
            file = %self.filename.display(),
            "compacted datafile"
        );
        Ok(())
    }

    /// Appends one line per record to the journal. Empty input is a no-op.
    ///
    /// # Errors
    ///
    /// Returns serialization or adapter errors.
    pub fn persist_new_state(&self, records: &[SharedDoc]) -> DbResult<()> {
        if self.in_memory || records.is_empty() {
            return Ok(());
        }

        let mut out = String::new();
        for record in records {
            out.push_str(&self.encode_line(record)?);
            out.push('\n');
        }
        self.backend.append_file(&self.filename, out.as_bytes())?;
        Ok(())
    }

    /// The crash-safe full-rewrite protocol:
    ///
    /// 1. fsync the directory
    /// 2. fsync the destination if it exists
    /// 3. write the new contents to `file~`
    /// 4. fsync `file~`
    /// 5. rename `file~` over `file` (atomic on POSIX)
    /// 6. fsync the directory
    fn crash_safe_write(&self, contents: &[u8]) -> DbResult<()> {
        let dir = self.dir();
        self.backend.sync_dir(dir)?;
        if self.backend.exists(&self.filename) {
            self.backend.sync_file(&self.filename)?;
        }
        self.backend.write_file(&self.temp_filename, contents)?;
        self.backend.sync_file(&self.temp_filename)?;
        self.backend.rename(&self.temp_filename, &self.filename)?;
        self.backend.sync_dir(dir)?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("filename", &self.filename)
            .field("in_memory", &self.in_memory)
            .finish_non_exhaustive()
    }
}

/// Builds the journal record declaring an index.
#[must_use]
pub fn index_created_record(def: &IndexDef) -> Value {
    Value::object(vec![(
        "$$indexCreated",
        Value::object(vec![
            ("fieldName", Value::from(def.field.as_str())),
            ("unique", Value::Bool(def.unique)),
        ]),
    )])
}

/// Builds the journal record dropping an index.
#[must_use]
pub fn index_removed_record(field: &str) -> Value {
    Value::object(vec![("$$indexRemoved", Value::from(field))])
}

/// Builds the tombstone record for a removed document.
#[must_use]
pub fn tombstone_record(id: &str) -> Value {
    Value::object(vec![
        ("_id", Value::from(id)),
        ("$$deleted", Value::Bool(true)),
    ])
}

fn fold_record(record: Value, docs: &mut BTreeMap<String, Value>, indexes: &mut Vec<IndexDef>) {
    // Decide what the record is before taking ownership of it.
    let id_and_tombstone = record.as_object().and_then(|map| {
        map.get("_id").and_then(Value::as_str).map(|id| {
            let deleted = map.get("$$deleted") == Some(&Value::Bool(true));
            (id.to_string(), deleted)
        })
    });

    if let Some((id, deleted)) = id_and_tombstone {
        if deleted {
            docs.remove(&id);
        } else {
            docs.insert(id, record);
        }
        return;
    }

    let Some(map) = record.as_object() else {
        return;
    };
    if let Some(def) = map.get("$$indexCreated").and_then(Value::as_object) {
        if let Some(field) = def.get("fieldName").and_then(Value::as_str) {
            let unique = def.get("unique").and_then(Value::as_bool).unwrap_or(false);
            indexes.retain(|d| d.field != field);
            indexes.push(IndexDef {
                field: field.to_string(),
                unique,
            });
        }
    } else if let Some(field) = map.get("$$indexRemoved").and_then(Value::as_str) {
        indexes.retain(|d| d.field != field);
    }
}
