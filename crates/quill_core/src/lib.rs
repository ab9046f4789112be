//! # Quill Core
//!
//! Document engine for quill, an embeddable single-file document database.
//!
//! This crate provides:
//! - [`Datastore`] — schemaless document CRUD over an append-only journal
//! - The query matcher (logical and comparison operators, regex, array
//!   semantics) and the modifier engine (`$set`, `$push`, ...)
//! - Ordered indexes with optional uniqueness and transactional rollback
//! - Crash-safe compaction and corruption-tolerant journal replay
//! - A serialized executor guaranteeing operation ordering
//!
//! ## Usage
//!
//! ```
//! use quill_core::{Datastore, DatastoreOptions, UpdateOptions, Value};
//!
//! let db = Datastore::new(DatastoreOptions::in_memory()).unwrap();
//!
//! db.insert(Value::object(vec![
//!     ("planet", Value::from("Earth")),
//!     ("inhabited", Value::Bool(true)),
//! ]))
//! .unwrap();
//!
//! let n = db
//!     .update(
//!         Value::object(vec![("planet", Value::from("Earth"))]),
//!         Value::object(vec![(
//!             "$set",
//!             Value::object(vec![("visited", Value::Bool(true))]),
//!         )]),
//!         UpdateOptions::default(),
//!     )
//!     .unwrap();
//! assert_eq!(n, 1);
//! ```
//!
//! File-backed datastores journal every mutation as one line of JSON and
//! compact the journal on load (and periodically, when autocompaction is
//! enabled). See [`DatastoreOptions`] for persistence configuration.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod datastore;
mod error;
mod executor;
mod index;
mod matcher;
mod modifier;
mod options;
mod persistence;

pub use cursor::Cursor;
pub use datastore::{Datastore, RemoveOptions, UpdateOptions};
pub use error::{DbError, DbResult};
pub use executor::Executor;
pub use index::{Bounds, Index, SharedDoc};
pub use matcher::{matches, Query, WherePredicate};
pub use modifier::modify;
pub use options::{DatastoreOptions, SerializationHook};
pub use persistence::{IndexDef, LoadResult, Persistence};

pub use quill_codec::{
    check_key, check_object, compare, compare_with, deep_copy, deserialize, dot_get, equal,
    serialize, StringCmp, Value,
};
