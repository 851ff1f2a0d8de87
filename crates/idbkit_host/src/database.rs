//! Structured database capability.
//!
//! These traits describe a callback-driven browser-style database: opening
//! is asynchronous and may pass through a schema upgrade, every request
//! completes through a callback, and transactions report their own
//! completion separately from their requests.
//!
//! # Invariants
//!
//! - `Callback`s are invoked exactly once
//! - a failing request aborts its transaction; the finish callback then
//!   receives the same error
//! - a finish callback registered after the outcome is known still fires
//! - cursor step callbacks fire once per position and once more at the end,
//!   unless the consumer stops advancing

use crate::error::HostResult;
use crate::record::{Key, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// A one-shot completion callback.
pub type Callback<T> = Box<dyn FnOnce(HostResult<T>)>;

/// Schema upgrade hook, run inside the open operation on a version change.
pub type UpgradeCallback = Box<dyn FnOnce(&dyn UpgradeScope) -> HostResult<()>>;

/// Cursor step callback. `Ok(None)` marks the end of the collection.
pub type CursorStep = Box<dyn FnMut(HostResult<Option<Box<dyn Cursor>>>)>;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl TransactionMode {
    /// Returns the browser name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name used for lookups.
    pub name: String,
    /// Record field the index is built on.
    pub key_path: String,
    /// Whether two records may share an index value.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Declares a non-unique index over `key_path`.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Primary-key layout of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Field holding the primary key.
    pub key_path: String,
    /// Whether the host assigns keys to records that lack one.
    pub auto_increment: bool,
}

impl Default for CollectionSchema {
    fn default() -> Self {
        Self {
            key_path: crate::record::ID_FIELD.to_string(),
            auto_increment: true,
        }
    }
}

/// A single operation against one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Number of records.
    Count,
    /// Record by primary key.
    Get(Key),
    /// First record whose index value matches.
    GetByIndex {
        /// Index name.
        index: String,
        /// Value looked up in the index.
        value: Key,
    },
    /// Insert; fails if the key exists.
    Add(Record),
    /// Insert or replace.
    Put(Record),
    /// Delete by primary key; succeeds for missing keys.
    Delete(Key),
    /// Remove every record.
    Clear,
}

impl Request {
    /// Returns the kind of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Count => RequestKind::Count,
            Request::Get(_) => RequestKind::Get,
            Request::GetByIndex { .. } => RequestKind::GetByIndex,
            Request::Add(_) => RequestKind::Add,
            Request::Put(_) => RequestKind::Put,
            Request::Delete(_) => RequestKind::Delete,
            Request::Clear => RequestKind::Clear,
        }
    }
}

/// Request kinds, including cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `count`
    Count,
    /// `get`
    Get,
    /// `index(..).get`
    GetByIndex,
    /// `openCursor`
    OpenCursor,
    /// `add`
    Add,
    /// `put`
    Put,
    /// `delete`
    Delete,
    /// `clear`
    Clear,
}

impl RequestKind {
    /// Returns true for kinds that modify the collection.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            RequestKind::Add | RequestKind::Put | RequestKind::Delete | RequestKind::Clear
        )
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Result of [`Request::Count`].
    Count(u64),
    /// Result of a lookup; `None` when nothing matched.
    Record(Option<Record>),
    /// Key written by [`Request::Add`] or [`Request::Put`].
    Key(Key),
    /// Completion without a value.
    Done,
}

/// Opens databases by name.
pub trait DatabaseFactory {
    /// Opens `name` at `version`.
    ///
    /// `on_upgrade` runs only when `version` is newer than the stored
    /// version. An error from it aborts the open. `on_done` receives the
    /// connection or the reason the open failed.
    fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: Callback<Rc<dyn Connection>>,
    );
}

/// Schema changes allowed during an upgrade.
pub trait UpgradeScope {
    /// Version stored before this upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    /// Returns true if the collection exists.
    fn has_collection(&self, name: &str) -> bool;

    /// Deletes a collection and its records.
    fn delete_collection(&self, name: &str) -> HostResult<()>;

    /// Creates a collection.
    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> HostResult<Box<dyn CollectionBuilder>>;
}

/// A collection being created, used to declare indexes.
pub trait CollectionBuilder {
    /// Collection name.
    fn name(&self) -> &str;

    /// Declares a secondary index.
    fn create_index(&self, spec: &IndexSpec) -> HostResult<()>;
}

/// An open database connection.
pub trait Connection {
    /// Database name.
    fn name(&self) -> &str;

    /// Schema version the connection was opened at.
    fn version(&self) -> u32;

    /// Names of the collections in the database.
    fn collection_names(&self) -> Vec<String>;

    /// Starts a transaction scoped to one collection.
    fn transaction(&self, collection: &str, mode: TransactionMode)
        -> HostResult<Box<dyn Transaction>>;

    /// Closes the connection.
    fn close(&self);
}

/// A transaction over one collection.
pub trait Transaction {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Issues a request; `on_done` receives its result.
    fn submit(&self, request: Request, on_done: Callback<Response>);

    /// Opens a cursor over the whole collection in ascending key order.
    fn open_cursor(&self, on_step: CursorStep);

    /// Registers the commit/abort notification.
    fn on_finish(&self, on_done: Callback<()>);
}

/// A position inside an open cursor.
pub trait Cursor {
    /// Primary key at this position.
    fn key(&self) -> Key;

    /// Record at this position.
    fn record(&self) -> Record;

    /// Moves to the next position; the step callback fires again.
    fn advance(&self);

    /// Replaces the record at this position.
    fn update(&self, record: Record);

    /// Deletes the record at this position.
    fn delete(&self);
}
