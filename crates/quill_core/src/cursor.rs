//! Query cursor: filter → sort → skip/limit → project.

use crate::datastore::Inner;
use crate::error::{DbError, DbResult};
use crate::index::SharedDoc;
use crate::matcher::Query;
use quill_codec::{compare_with, deep_copy, dot_get, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A lazily-executed query over a datastore.
///
/// Built by [`Datastore::find`](crate::Datastore::find); nothing runs
/// until [`exec`](Cursor::exec), which submits the read to the datastore's
/// executor so it observes every operation submitted before it.
pub struct Cursor {
    inner: Arc<Inner>,
    query: Query,
    sort_spec: Vec<(String, i32)>,
    skip: Option<usize>,
    limit: Option<usize>,
    projection: Option<Value>,
}

impl Cursor {
    pub(crate) fn new(inner: Arc<Inner>, query: Query) -> Self {
        Self {
            inner,
            query,
            sort_spec: Vec::new(),
            skip: None,
            limit: None,
            projection: None,
        }
    }

    /// Adds a sort key. Keys apply in the order given; each carries its
    /// own direction (negative for descending).
    #[must_use]
    pub fn sort(mut self, key: &str, direction: i32) -> Self {
        self.sort_spec.push((key.to_string(), direction));
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sets the projection: `{field: 1, ...}` keeps only the listed
    /// fields, `{field: 0, ...}` drops them. The two modes cannot mix,
    /// except for `_id`, which is kept by default and may always be
    /// dropped with `_id: 0`.
    #[must_use]
    pub fn projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Runs the query and returns deep copies of the matching documents.
    ///
    /// # Errors
    ///
    /// Returns matcher and projection errors.
    pub fn exec(self) -> DbResult<Vec<Value>> {
        let executor = Arc::clone(&self.inner);
        executor.executor.submit(false, move || self.exec_impl())?
    }

    fn exec_impl(&self) -> DbResult<Vec<Value>> {
        let state = self.inner.state.read();
        let candidates = self.inner.candidates(&state, &self.query.spec);

        // Without a sort there is no point matching past skip+limit.
        let cap = if self.sort_spec.is_empty() {
            self.limit.map(|l| l.saturating_add(self.skip.unwrap_or(0)))
        } else {
            None
        };

        let mut matched: Vec<SharedDoc> = Vec::new();
        for candidate in candidates {
            if self.query.matches(&candidate)? {
                matched.push(candidate);
                if cap.is_some_and(|c| matched.len() >= c) {
                    break;
                }
            }
        }

        if !self.sort_spec.is_empty() {
            let str_cmp = self.inner.compare_strings.clone();
            matched.sort_by(|a, b| {
                for (key, direction) in &self.sort_spec {
                    let ord =
                        compare_with(&dot_get(a, key), &dot_get(b, key), str_cmp.as_ref());
                    let ord = if *direction < 0 { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skipped = matched.into_iter().skip(self.skip.unwrap_or(0));
        let selected: Vec<SharedDoc> = match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        };

        selected.iter().map(|doc| self.project(doc)).collect()
    }

    fn project(&self, doc: &Value) -> DbResult<Value> {
        let Some(projection) = &self.projection else {
            return Ok(deep_copy(doc, false));
        };
        let pmap = projection
            .as_object()
            .ok_or_else(|| DbError::bad_operand("projection must be an object"))?;

        let mut keep_id = true;
        let mut inclusion: Option<bool> = None;
        let mut paths: Vec<&str> = Vec::new();
        for (key, flag) in pmap {
            let on = !matches!(flag, Value::Number(n) if *n == 0.0)
                && !matches!(flag, Value::Bool(false));
            if key == "_id" {
                keep_id = on;
                continue;
            }
            match inclusion {
                None => inclusion = Some(on),
                Some(mode) if mode != on => return Err(DbError::MixedProjection),
                Some(_) => {}
            }
            paths.push(key);
        }

        match inclusion {
            // Only an `_id` directive: everything else is kept.
            None => {
                let mut copy = deep_copy(doc, false);
                if !keep_id {
                    if let Some(map) = copy.as_object_mut() {
                        map.remove("_id");
                    }
                }
                Ok(copy)
            }
            Some(true) => {
                let mut out = Value::Object(BTreeMap::new());
                for path in paths {
                    let value = dot_get(doc, path);
                    if !value.is_undefined() {
                        set_path(&mut out, path, deep_copy(&value, false));
                    }
                }
                if keep_id {
                    if let Some(id) = doc.get("_id") {
                        set_path(&mut out, "_id", id.clone());
                    }
                }
                Ok(out)
            }
            Some(false) => {
                let mut copy = deep_copy(doc, false);
                for path in paths {
                    remove_path(&mut copy, path);
                }
                if !keep_id {
                    if let Some(map) = copy.as_object_mut() {
                        map.remove("_id");
                    }
                }
                Ok(copy)
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("sort", &self.sort_spec)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}

/// Sets a dot-path in an object tree, creating intermediate objects.
fn set_path(target: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    set_path_parts(target, &parts, value);
}

fn set_path_parts(current: &mut Value, parts: &[&str], value: Value) {
    let Some((&head, rest)) = parts.split_first() else {
        return;
    };
    let Some(map) = current.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.to_string(), value);
        return;
    }
    let child = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(BTreeMap::new()));
    set_path_parts(child, rest, value);
}

/// Removes a dot-path leaf from an object tree; missing paths are a no-op.
fn remove_path(target: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    remove_path_parts(target, &parts);
}

fn remove_path_parts(current: &mut Value, parts: &[&str]) {
    let Some((&head, rest)) = parts.split_first() else {
        return;
    };
    let Some(map) = current.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.remove(head);
        return;
    }
    if let Some(child) = map.get_mut(head) {
        remove_path_parts(child, rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_path_builds_nested_objects() {
        let mut out = Value::Object(BTreeMap::new());
        set_path(&mut out, "a.b.c", Value::Number(1.0));
        assert_eq!(dot_get(&out, "a.b.c"), Value::Number(1.0));
    }

    #[test]
    fn remove_path_is_silent_on_misses() {
        let mut doc = Value::object(vec![("a", Value::object(vec![("b", Value::Null)]))]);
        remove_path(&mut doc, "a.b");
        remove_path(&mut doc, "ghost.x");
        assert_eq!(dot_get(&doc, "a.b"), Value::Undefined);
        assert!(doc.get("a").is_some());
    }
}
