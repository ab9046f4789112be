//! Ordered key→document index.
//!
//! Backed by a `BTreeMap` over an ordering wrapper that applies the value
//! comparison (with the index's optional string comparator), which gives
//! the same guarantees as a self-balancing tree. Entries hold shared
//! references to the canonical documents; every index on a datastore
//! points at the same allocations.

use crate::error::{DbError, DbResult};
use quill_codec::{compare_with, dot_get, StringCmp, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// A shared reference to a canonical document.
pub type SharedDoc = Arc<Value>;

/// Range bounds for an ordered index traversal, mirroring the comparison
/// operators a query may put on an indexed field.
#[derive(Debug, Default, Clone)]
pub struct Bounds {
    /// Exclusive lower bound.
    pub gt: Option<Value>,
    /// Inclusive lower bound.
    pub gte: Option<Value>,
    /// Exclusive upper bound.
    pub lt: Option<Value>,
    /// Inclusive upper bound.
    pub lte: Option<Value>,
}

impl Bounds {
    /// Extracts bounds from a query operand of the form
    /// `{$gt: v, $lte: w, ...}`. Returns `None` if the operand carries no
    /// comparison operator.
    pub fn from_operand(operand: &Value) -> Option<Self> {
        let map = operand.as_object()?;
        let bounds = Self {
            gt: map.get("$gt").cloned(),
            gte: map.get("$gte").cloned(),
            lt: map.get("$lt").cloned(),
            lte: map.get("$lte").cloned(),
        };
        if bounds.gt.is_none() && bounds.gte.is_none() && bounds.lt.is_none() && bounds.lte.is_none()
        {
            return None;
        }
        Some(bounds)
    }
}

/// Key wrapper whose ordering delegates to the value comparison.
///
/// Every key in one index shares the same comparator, so the map's order
/// is consistent.
struct OrdKey {
    value: Value,
    str_cmp: Option<StringCmp>,
}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_with(&self.value, &other.value, self.str_cmp.as_ref())
    }
}

/// An ordered map from extracted document keys to documents.
///
/// Keys are scalars extracted from the indexed dot-path. Array keys are
/// rejected outright; a missing field indexes under null. Under a unique
/// index, null keys are rejected and duplicate keys fail the operation.
///
/// Inserting an existing key on a non-unique index overwrites the previous
/// entry (map semantics; see the README).
pub struct Index {
    field: String,
    unique: bool,
    str_cmp: Option<StringCmp>,
    entries: BTreeMap<OrdKey, SharedDoc>,
}

impl Index {
    /// Creates an empty index over a dot-path.
    #[must_use]
    pub fn new(field: impl Into<String>, unique: bool, str_cmp: Option<StringCmp>) -> Self {
        Self {
            field: field.into(),
            unique,
            str_cmp,
            entries: BTreeMap::new(),
        }
    }

    /// The indexed dot-path.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Whether this index enforces uniqueness.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn wrap(&self, value: Value) -> OrdKey {
        OrdKey {
            value,
            str_cmp: self.str_cmp.clone(),
        }
    }

    /// Extracts the index key from a document.
    ///
    /// A dot-path miss normalizes to null so absent fields group together.
    ///
    /// # Errors
    ///
    /// Returns `ArrayKey` for array-valued fields.
    fn key_for(&self, doc: &Value) -> DbResult<Value> {
        match dot_get(doc, &self.field) {
            Value::Array(_) => Err(DbError::ArrayKey {
                field: self.field.clone(),
            }),
            Value::Undefined => Ok(Value::Null),
            key => Ok(key),
        }
    }

    /// Inserts a document.
    ///
    /// # Errors
    ///
    /// - `ArrayKey` if the indexed field is an array
    /// - `NullKey` if the key is null (or missing) under a unique index
    /// - `UniqueViolation` on a duplicate key under a unique index
    pub fn insert(&mut self, doc: &SharedDoc) -> DbResult<()> {
        let key = self.key_for(doc)?;

        if self.unique {
            if key.is_null() {
                return Err(DbError::NullKey {
                    field: self.field.clone(),
                });
            }
            if self.entries.contains_key(&self.wrap(key.clone())) {
                return Err(DbError::unique_violation(&self.field, format!("{key:?}")));
            }
        }

        self.entries.insert(self.wrap(key), Arc::clone(doc));
        Ok(())
    }

    /// Inserts a batch of documents, all-or-nothing.
    ///
    /// On failure, exactly the documents inserted by this call are removed
    /// again before the error propagates.
    ///
    /// # Errors
    ///
    /// Propagates the first insertion failure.
    pub fn insert_many(&mut self, docs: &[SharedDoc]) -> DbResult<()> {
        let mut inserted: Vec<SharedDoc> = Vec::new();
        for doc in docs {
            if let Err(err) = self.insert(doc) {
                for done in &inserted {
                    self.remove(done);
                }
                return Err(err);
            }
            inserted.push(Arc::clone(doc));
        }
        Ok(())
    }

    /// Removes a document's entry. Absent keys (and documents whose key
    /// cannot be extracted) are a silent no-op.
    pub fn remove(&mut self, doc: &Value) {
        if let Ok(key) = self.key_for(doc) {
            self.entries.remove(&self.wrap(key));
        }
    }

    /// Removes a batch of documents.
    pub fn remove_many(&mut self, docs: &[SharedDoc]) {
        for doc in docs {
            self.remove(doc);
        }
    }

    /// Removes entries by raw key value, or by each key of an array.
    pub fn remove_key(&mut self, key_or_keys: &Value) {
        match key_or_keys {
            Value::Array(keys) => {
                for key in keys {
                    self.entries.remove(&self.wrap(key.clone()));
                }
            }
            key => {
                self.entries.remove(&self.wrap(key.clone()));
            }
        }
    }

    /// Replaces a document's entry with a new version.
    ///
    /// # Errors
    ///
    /// On failure the old entry is restored before the error propagates.
    pub fn update(&mut self, old: &SharedDoc, new: &SharedDoc) -> DbResult<()> {
        self.remove(old);
        if let Err(err) = self.insert(new) {
            // Reinsertion of the old entry cannot fail harder than the
            // insert that just did: its key was valid a moment ago.
            let _ = self.insert(old);
            return Err(err);
        }
        Ok(())
    }

    /// Looks up the document stored under a key.
    #[must_use]
    pub fn find(&self, key: &Value) -> Option<SharedDoc> {
        self.entries.get(&self.wrap(key.clone())).map(Arc::clone)
    }

    /// Returns the documents matching a key, or any of a list of keys when
    /// given an array (the `$in` shape).
    #[must_use]
    pub fn get_matching(&self, key_or_keys: &Value) -> Vec<SharedDoc> {
        match key_or_keys {
            Value::Array(keys) => keys.iter().filter_map(|k| self.find(k)).collect(),
            key => self.find(key).into_iter().collect(),
        }
    }

    /// Returns the documents whose keys fall within the bounds, in key
    /// order.
    #[must_use]
    pub fn between_bounds(&self, bounds: &Bounds) -> Vec<SharedDoc> {
        let lower = match (&bounds.gt, &bounds.gte) {
            (Some(v), _) => Bound::Excluded(self.wrap(v.clone())),
            (None, Some(v)) => Bound::Included(self.wrap(v.clone())),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&bounds.lt, &bounds.lte) {
            (Some(v), _) => Bound::Excluded(self.wrap(v.clone())),
            (None, Some(v)) => Bound::Included(self.wrap(v.clone())),
            (None, None) => Bound::Unbounded,
        };

        self.entries
            .range((lower, upper))
            .map(|(_, doc)| Arc::clone(doc))
            .collect()
    }

    /// Returns every document in key order.
    #[must_use]
    pub fn get_all(&self) -> Vec<SharedDoc> {
        self.entries.values().map(Arc::clone).collect()
    }

    /// Clears the index and, when given, bulk-inserts a new document set.
    ///
    /// # Errors
    ///
    /// Propagates bulk-insert failures; the index is left holding the
    /// documents inserted before the failure was rolled back (i.e. empty).
    pub fn reset(&mut self, docs: &[SharedDoc]) -> DbResult<()> {
        self.entries.clear();
        self.insert_many(docs)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("field", &self.field)
            .field("unique", &self.unique)
            .field("count", &self.entries.len())
            .finish_non_exhaustive()
    }
}
