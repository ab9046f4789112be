//! Datastore façade.
//!
//! Glues the indexes, the persistence layer, and the executor together and
//! exposes document CRUD. Every operation is submitted to the executor and
//! processed one at a time in submission order, so an operation always
//! observes the full effect (indexes and journal) of the operations before
//! it.

use crate::cursor::Cursor;
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::index::{Bounds, Index, SharedDoc};
use crate::matcher::Query;
use crate::modifier::modify;
use crate::options::DatastoreOptions;
use crate::persistence::{
    index_created_record, index_removed_record, tombstone_record, IndexDef, Persistence,
};
use parking_lot::{Mutex, RwLock};
use quill_codec::{check_object, deep_copy, StringCmp, Value};
use quill_storage::{FileBackend, MemoryBackend, StorageBackend};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Options for an update operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first.
    pub multi: bool,
    /// Insert a document derived from the query and update when nothing
    /// matches.
    pub upsert: bool,
}

/// Options for a remove operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove every matching document instead of the first.
    pub multi: bool,
}

/// The index set of a datastore. The `_id` index is always present and
/// always first, so it is the last to be rolled back and the authoritative
/// document collection.
pub(crate) struct State {
    indexes: Vec<Index>,
}

impl State {
    fn new(str_cmp: Option<StringCmp>) -> Self {
        Self {
            indexes: vec![Index::new("_id", true, str_cmp)],
        }
    }

    pub(crate) fn id_index(&self) -> &Index {
        &self.indexes[0]
    }

    fn index_defs(&self) -> Vec<IndexDef> {
        self.indexes
            .iter()
            .map(|i| IndexDef {
                field: i.field().to_string(),
                unique: i.is_unique(),
            })
            .collect()
    }

    /// Adds one document to every index, rolling the successful ones back
    /// if a later one rejects it.
    fn add_doc(&mut self, doc: &SharedDoc) -> DbResult<()> {
        for i in 0..self.indexes.len() {
            if let Err(err) = self.indexes[i].insert(doc) {
                for rollback in &mut self.indexes[..i] {
                    rollback.remove(doc);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remove_doc(&mut self, doc: &Value) {
        for index in &mut self.indexes {
            index.remove(doc);
        }
    }

    /// Adds a batch of documents, all-or-nothing.
    fn add_docs(&mut self, docs: &[SharedDoc]) -> DbResult<()> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(err) = self.add_doc(doc) {
                for done in &docs[..i] {
                    self.remove_doc(done);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Swaps one document version in every index, restoring the old entry
    /// everywhere on failure.
    fn update_doc(&mut self, old: &SharedDoc, new: &SharedDoc) -> DbResult<()> {
        for i in 0..self.indexes.len() {
            if let Err(err) = self.indexes[i].update(old, new) {
                for rollback in &mut self.indexes[..i] {
                    // The swap back cannot fail: both entries were valid
                    // in this index a moment ago.
                    let _ = rollback.update(new, old);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Swaps a batch of document versions, all-or-nothing.
    fn update_docs(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DbResult<()> {
        for (i, (old, new)) in pairs.iter().enumerate() {
            if let Err(err) = self.update_doc(old, new) {
                for (done_old, done_new) in &pairs[..i] {
                    let _ = self.update_doc(done_new, done_old);
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Shared datastore internals: everything the executor tasks operate on.
pub(crate) struct Inner {
    timestamp_data: bool,
    in_memory: bool,
    pub(crate) compare_strings: Option<StringCmp>,
    pub(crate) executor: Executor,
    pub(crate) state: RwLock<State>,
    persistence: Persistence,
    autocompaction: Mutex<Option<Autocompactor>>,
}

/// An embeddable, single-file document datastore.
///
/// # Example
///
/// ```
/// use quill_core::{Datastore, DatastoreOptions, Value};
///
/// let db = Datastore::new(DatastoreOptions::in_memory()).unwrap();
/// db.insert(Value::object(vec![("planet", Value::from("Earth"))])).unwrap();
///
/// let found = db
///     .find(Value::object(vec![("planet", Value::from("Earth"))]))
///     .exec()
///     .unwrap();
/// assert_eq!(found.len(), 1);
/// ```
pub struct Datastore {
    inner: Arc<Inner>,
}

impl Datastore {
    /// Opens a datastore with the given options.
    ///
    /// File-backed datastores must be loaded (via `autoload` or an
    /// explicit [`load`](Self::load) call) before queued operations run.
    /// In-memory datastores are ready immediately.
    ///
    /// # Errors
    ///
    /// Returns configuration validation errors, and load errors when
    /// `autoload` is set.
    pub fn new(options: DatastoreOptions) -> DbResult<Self> {
        let backend: Arc<dyn StorageBackend> = if options.in_memory_only {
            Arc::new(MemoryBackend::new())
        } else {
            Arc::new(FileBackend::new())
        };
        Self::with_backend(options, backend)
    }

    /// Opens a datastore over an explicit storage backend.
    ///
    /// # Errors
    ///
    /// Returns configuration validation errors, and load errors when
    /// `autoload` is set.
    pub fn with_backend(
        options: DatastoreOptions,
        backend: Arc<dyn StorageBackend>,
    ) -> DbResult<Self> {
        options.validate()?;

        let inner = Arc::new(Inner {
            timestamp_data: options.timestamp_data,
            in_memory: options.in_memory_only,
            compare_strings: options.compare_strings.clone(),
            executor: Executor::new(),
            state: RwLock::new(State::new(options.compare_strings.clone())),
            persistence: Persistence::new(&options, backend),
            autocompaction: Mutex::new(None),
        });
        let datastore = Self { inner };

        if options.in_memory_only {
            datastore.inner.executor.process_buffer();
        } else if options.autoload {
            datastore.load()?;
        }

        Ok(datastore)
    }

    /// Loads the datafile: replays the journal, rebuilds the indexes,
    /// compacts, and releases the executor's buffer.
    ///
    /// The load runs ahead of any queued user operation.
    ///
    /// # Errors
    ///
    /// Returns corruption, index, or I/O errors. On failure the buffer is
    /// not released.
    pub fn load(&self) -> DbResult<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(true, move || inner.load_impl())?
    }

    /// Inserts a document, assigning an `_id` if absent.
    ///
    /// Returns a deep copy of the stored document.
    ///
    /// # Errors
    ///
    /// Returns validation and index errors; on an index error nothing is
    /// stored.
    pub fn insert(&self, doc: Value) -> DbResult<Value> {
        let inner = Arc::clone(&self.inner);
        let mut inserted = self
            .inner
            .executor
            .submit(false, move || inner.insert_impl(vec![doc]))??;
        Ok(inserted.remove(0))
    }

    /// Inserts a batch of documents, all-or-nothing.
    ///
    /// # Errors
    ///
    /// If any document is rejected, none are stored.
    pub fn insert_many(&self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(false, move || inner.insert_impl(docs))?
    }

    /// Starts a find query. Refine with the cursor's `sort`, `skip`,
    /// `limit`, and `projection`, then call `exec`.
    #[must_use]
    pub fn find(&self, query: impl Into<Query>) -> Cursor {
        Cursor::new(Arc::clone(&self.inner), query.into())
    }

    /// Returns the first matching document, if any.
    ///
    /// # Errors
    ///
    /// Returns query evaluation errors.
    pub fn find_one(&self, query: impl Into<Query>) -> DbResult<Option<Value>> {
        let mut results = self.find(query).limit(1).exec()?;
        Ok(if results.is_empty() {
            None
        } else {
            Some(results.remove(0))
        })
    }

    /// Counts the documents matching a query.
    ///
    /// # Errors
    ///
    /// Returns query evaluation errors.
    pub fn count(&self, query: impl Into<Query>) -> DbResult<usize> {
        Ok(self.find(query).exec()?.len())
    }

    /// Updates the documents matching `query`.
    ///
    /// Returns the number of affected documents (1 for an upsert insert).
    ///
    /// # Errors
    ///
    /// Returns matcher, modifier, and index errors; on failure no document
    /// is modified.
    pub fn update(
        &self,
        query: impl Into<Query>,
        update: Value,
        options: UpdateOptions,
    ) -> DbResult<usize> {
        let inner = Arc::clone(&self.inner);
        let query = query.into();
        self.inner
            .executor
            .submit(false, move || inner.update_impl(&query, &update, options))?
    }

    /// Removes the documents matching `query`.
    ///
    /// Returns the number of removed documents.
    ///
    /// # Errors
    ///
    /// Returns matcher and persistence errors.
    pub fn remove(&self, query: impl Into<Query>, options: RemoveOptions) -> DbResult<usize> {
        let inner = Arc::clone(&self.inner);
        let query = query.into();
        self.inner
            .executor
            .submit(false, move || inner.remove_impl(&query, options))?
    }

    /// Creates an index over a dot-path, replaying the current documents
    /// into it. Creating an index that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Returns index errors (e.g. an existing pair of documents violates a
    /// unique constraint), in which case the index is not created.
    pub fn ensure_index(&self, field: &str, unique: bool) -> DbResult<()> {
        let inner = Arc::clone(&self.inner);
        let field = field.to_string();
        self.inner
            .executor
            .submit(false, move || inner.ensure_index_impl(&field, unique))?
    }

    /// Drops the index over a dot-path.
    ///
    /// # Errors
    ///
    /// Returns an error when asked to drop the `_id` index.
    pub fn remove_index(&self, field: &str) -> DbResult<()> {
        let inner = Arc::clone(&self.inner);
        let field = field.to_string();
        self.inner
            .executor
            .submit(false, move || inner.remove_index_impl(&field))?
    }

    /// Returns a deep copy of every live document, in `_id` order.
    ///
    /// # Errors
    ///
    /// Returns executor errors only.
    pub fn get_all_data(&self) -> DbResult<Vec<Value>> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(false, move || {
            let state = inner.state.read();
            state
                .id_index()
                .get_all()
                .iter()
                .map(|doc| deep_copy(doc, false))
                .collect()
        })
    }

    /// Queues a compaction of the datafile.
    ///
    /// # Errors
    ///
    /// Returns serialization or I/O errors from the rewrite.
    pub fn compact_datafile(&self) -> DbResult<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(false, move || inner.compact_impl())?
    }

    /// Starts (or restarts) periodic compaction. The interval is clamped
    /// to a minimum of five seconds.
    pub fn set_autocompaction_interval(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(5000));
        let weak = Arc::downgrade(&self.inner);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("quill-autocompaction".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let task_inner = Arc::clone(&inner);
                        inner.executor.push(
                            move || {
                                if let Err(err) = task_inner.compact_impl() {
                                    warn!(error = %err, "autocompaction failed");
                                }
                            },
                            false,
                        );
                    }
                }
            })
            .expect("spawning the autocompaction timer thread");

        *self.inner.autocompaction.lock() = Some(Autocompactor {
            stop: stop_tx,
            handle: Some(handle),
        });
    }

    /// Stops periodic compaction.
    pub fn stop_autocompaction(&self) {
        *self.inner.autocompaction.lock() = None;
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("in_memory", &self.inner.in_memory)
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn now() -> Value {
        #[allow(clippy::cast_possible_truncation)]
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Value::Date(ms)
    }

    fn new_id() -> Value {
        Value::String(Uuid::new_v4().simple().to_string())
    }

    /// Validates a document for insertion, assigning `_id` and timestamps.
    fn prepare_doc(&self, mut doc: Value) -> DbResult<Value> {
        let Some(map) = doc.as_object_mut() else {
            return Err(DbError::type_mismatch("only objects can be inserted"));
        };

        match map.get("_id") {
            None => {
                map.insert("_id".to_string(), Self::new_id());
            }
            Some(Value::String(_)) => {}
            Some(_) => return Err(DbError::type_mismatch("_id must be a string")),
        }
        if self.timestamp_data {
            let now = Self::now();
            map.entry("createdAt".to_string()).or_insert_with(|| now.clone());
            map.entry("updatedAt".to_string()).or_insert(now);
        }

        check_object(&doc)?;
        Ok(doc)
    }

    fn insert_impl(&self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        let mut prepared: Vec<SharedDoc> = Vec::with_capacity(docs.len());
        for doc in docs {
            prepared.push(Arc::new(self.prepare_doc(doc)?));
        }

        self.state.write().add_docs(&prepared)?;
        self.persistence.persist_new_state(&prepared)?;

        Ok(prepared.iter().map(|doc| deep_copy(doc, false)).collect())
    }

    /// Picks candidate documents for a query using the narrowest usable
    /// index: an equality term wins, then `$in`, then comparison bounds;
    /// otherwise every document (via `_id`). This is an optimization only;
    /// the full predicate still runs on every candidate.
    pub(crate) fn candidates(&self, state: &State, query: &Value) -> Vec<SharedDoc> {
        if let Some(qmap) = query.as_object() {
            for index in &state.indexes {
                match qmap.get(index.field()) {
                    Some(
                        key @ (Value::Null
                        | Value::Bool(_)
                        | Value::Number(_)
                        | Value::String(_)
                        | Value::Date(_)),
                    ) => return index.get_matching(key),
                    _ => {}
                }
            }
            for index in &state.indexes {
                if let Some(operand) = qmap.get(index.field()) {
                    if let Some(keys @ Value::Array(_)) =
                        operand.as_object().and_then(|m| m.get("$in"))
                    {
                        return index.get_matching(keys);
                    }
                }
            }
            for index in &state.indexes {
                if let Some(operand) = qmap.get(index.field()) {
                    if let Some(bounds) = Bounds::from_operand(operand) {
                        return index.between_bounds(&bounds);
                    }
                }
            }
        }
        state.id_index().get_all()
    }

    fn update_impl(
        &self,
        query: &Query,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResult<usize> {
        let mut state = self.state.write();
        let candidates = self.candidates(&state, &query.spec);

        let mut pairs: Vec<(SharedDoc, SharedDoc)> = Vec::new();
        for candidate in candidates {
            if !(options.multi || pairs.is_empty()) {
                break;
            }
            if !query.matches(&candidate)? {
                continue;
            }

            let mut new_doc = modify(&candidate, update)?;
            if self.timestamp_data {
                if let Some(map) = new_doc.as_object_mut() {
                    // createdAt survives a full replace; updatedAt always
                    // moves forward.
                    if let Some(created) = candidate.get("createdAt") {
                        map.insert("createdAt".to_string(), created.clone());
                    }
                    map.insert("updatedAt".to_string(), Self::now());
                }
            }
            pairs.push((candidate, Arc::new(new_doc)));
        }

        if pairs.is_empty() {
            if !options.upsert {
                return Ok(0);
            }
            // Upsert: the update itself when it is a plain document, else
            // the modifiers applied to a document derived from the query's
            // plain fields.
            let to_insert = if update
                .as_object()
                .is_some_and(|m| m.keys().any(|k| k.starts_with('$')))
            {
                let base = deep_copy(&query.spec, true);
                modify(&base, update)?
            } else {
                update.clone()
            };

            let prepared = Arc::new(self.prepare_doc(to_insert)?);
            state.add_docs(std::slice::from_ref(&prepared))?;
            self.persistence.persist_new_state(&[prepared])?;
            return Ok(1);
        }

        state.update_docs(&pairs)?;

        let records: Vec<SharedDoc> = pairs.iter().map(|(_, new)| Arc::clone(new)).collect();
        self.persistence.persist_new_state(&records)?;

        Ok(pairs.len())
    }

    fn remove_impl(&self, query: &Query, options: RemoveOptions) -> DbResult<usize> {
        let mut state = self.state.write();
        let candidates = self.candidates(&state, &query.spec);

        let mut removed: Vec<SharedDoc> = Vec::new();
        for candidate in candidates {
            if !(options.multi || removed.is_empty()) {
                break;
            }
            if query.matches(&candidate)? {
                removed.push(candidate);
            }
        }

        let mut tombstones: Vec<SharedDoc> = Vec::with_capacity(removed.len());
        for doc in &removed {
            state.remove_doc(doc);
            if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                tombstones.push(Arc::new(tombstone_record(id)));
            }
        }
        self.persistence.persist_new_state(&tombstones)?;

        Ok(removed.len())
    }

    fn ensure_index_impl(&self, field: &str, unique: bool) -> DbResult<()> {
        if field.is_empty() {
            return Err(DbError::invalid_config("ensure_index requires a field name"));
        }

        let mut state = self.state.write();
        if state.indexes.iter().any(|i| i.field() == field) {
            return Ok(());
        }

        let mut index = Index::new(field, unique, self.compare_strings.clone());
        let docs = state.id_index().get_all();
        index.insert_many(&docs)?;
        state.indexes.push(index);

        let record = index_created_record(&IndexDef {
            field: field.to_string(),
            unique,
        });
        self.persistence.persist_new_state(&[Arc::new(record)])?;
        Ok(())
    }

    fn remove_index_impl(&self, field: &str) -> DbResult<()> {
        if field == "_id" {
            return Err(DbError::invalid_config("the _id index cannot be removed"));
        }

        let mut state = self.state.write();
        state.indexes.retain(|i| i.field() != field);

        self.persistence
            .persist_new_state(&[Arc::new(index_removed_record(field))])?;
        Ok(())
    }

    fn load_impl(&self) -> DbResult<()> {
        if self.in_memory {
            self.executor.process_buffer();
            return Ok(());
        }

        let loaded = self.persistence.load_file()?;
        let docs: Vec<SharedDoc> = loaded.docs.into_iter().map(Arc::new).collect();

        {
            let mut state = self.state.write();
            let mut indexes = vec![Index::new("_id", true, self.compare_strings.clone())];
            for def in &loaded.indexes {
                indexes.push(Index::new(
                    &def.field,
                    def.unique,
                    self.compare_strings.clone(),
                ));
            }

            for index in &mut indexes {
                if let Err(err) = index.reset(&docs) {
                    // A journal that violates its own declared constraints
                    // must not come up half-indexed.
                    state.indexes = vec![Index::new("_id", true, self.compare_strings.clone())];
                    return Err(err);
                }
            }
            state.indexes = indexes;

            self.persistence
                .persist_cached_database(&state.id_index().get_all(), &state.index_defs())?;
        }

        self.executor.process_buffer();
        Ok(())
    }

    pub(crate) fn compact_impl(&self) -> DbResult<()> {
        let state = self.state.read();
        self.persistence
            .persist_cached_database(&state.id_index().get_all(), &state.index_defs())
    }
}

/// Handle to the autocompaction timer thread; dropping it stops the timer.
struct Autocompactor {
    stop: crossbeam_channel::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Autocompactor {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            // The timer thread itself may drop the last datastore handle;
            // joining from there would deadlock.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
