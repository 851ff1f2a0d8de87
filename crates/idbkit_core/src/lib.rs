//! # idbkit Core
//!
//! Straight-line async access to callback-driven browser databases, and a
//! bounded log that flushes itself when full.
//!
//! This crate provides:
//! - [`IndexedDb`], the query façade (count, get, index lookup, iteration,
//!   upsert, delete, clear) and [`create_database`]
//! - [`OpenHandle`] and [`TransactionRequest`], the open/upgrade and
//!   single-request primitives underneath it
//! - [`completion`], a single-slot cell turning host callbacks into futures
//! - [`LogBuffer`], the bounded log buffer
//!
//! Host collaborators come from `idbkit_host` and are injected through
//! [`HostServices`].
//!
//! ## Example
//!
//! ```rust
//! use idbkit_core::{LogBuffer, LogConfig, TransportResult};
//! use idbkit_host::MemoryKeyValueStore;
//! use std::rc::Rc;
//!
//! let log = LogBuffer::new(
//!     LogConfig::new("app.log", "app.log.allowed", 3),
//!     Rc::new(MemoryKeyValueStore::new()),
//!     Rc::new(|payload: &str| -> TransportResult {
//!         println!("sending {payload}");
//!         Ok(())
//!     }),
//! )
//! .unwrap();
//!
//! log.append("started").unwrap();
//! assert_eq!(log.len().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod config;
mod descriptor;
mod error;
mod facade;
mod handle;
mod log;
mod request;
mod services;

pub use completion::{completion, Pending, Resolver};
pub use config::{DbConfig, LogConfig};
pub use descriptor::DatabaseDescriptor;
pub use error::{CoreError, CoreResult};
pub use facade::{create_database, create_database_with, IndexedDb, UpsertOutcome};
pub use handle::{IndexHook, OpenHandle, OpenState};
pub use log::{
    AppendOutcome, Clock, FixedClock, LogBuffer, LogRecords, LogTransport, SystemClock,
    TransportResult, TIMESTAMP_FORMAT,
};
pub use request::{CursorAction, Operation, TransactionRequest};
pub use services::HostServices;
