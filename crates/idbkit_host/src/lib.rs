//! # idbkit Host
//!
//! Capability interfaces for the collaborators idbkit runs on top of.
//!
//! The core never reaches for host globals. Instead it is handed:
//! - a [`DatabaseFactory`] that opens callback-driven structured databases
//! - a [`KeyValueStore`] for small persisted strings
//! - a [`DiagnosticSink`] for one-way trace messages
//!
//! ## Design Principles
//!
//! - Every database request completes through a callback exactly once
//! - Hosts are single-threaded; nothing here is `Send`
//! - Hosts do no validation beyond what a browser database would enforce
//!
//! ## Available Hosts
//!
//! - [`MemoryHost`] - an in-memory structured database with an event queue
//! - [`MemoryKeyValueStore`] - an in-memory key/value store
//! - [`TracingSink`] / [`RecordingSink`] - diagnostic sinks
//!
//! ## Example
//!
//! ```rust
//! use idbkit_host::{KeyValueStore, MemoryKeyValueStore};
//!
//! let store = MemoryKeyValueStore::new();
//! store.write("greeting", "hello").unwrap();
//! assert_eq!(store.read("greeting").unwrap().as_deref(), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod diagnostics;
mod error;
mod kv;
mod memory;
mod record;

pub use database::{
    Callback, CollectionBuilder, CollectionSchema, Connection, Cursor, CursorStep,
    DatabaseFactory, IndexSpec, Request, RequestKind, Response, Transaction, TransactionMode,
    UpgradeCallback, UpgradeScope,
};
pub use diagnostics::{DiagnosticLevel, DiagnosticSink, RecordingSink, TracingSink};
pub use error::{HostError, HostResult};
pub use kv::{load_object, store_object, KeyValueStore, MemoryKeyValueStore};
pub use memory::{DispatchMode, MemoryHost};
pub use record::{Key, Record, ID_FIELD};
