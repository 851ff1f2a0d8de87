//! # idbkit Testkit
//!
//! Test utilities for idbkit.
//!
//! This crate provides:
//! - [`TestHost`], an in-memory host with every collaborator wired up
//! - [`RecordingTransport`], a log transport that keeps what it was sent
//! - Property-based test generators using proptest
//! - [`init_tracing`] for readable test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idbkit_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn stores_a_record() {
//!     let env = TestHost::new();
//!     let db = env.create("users", "profiles").await;
//!     db.upsert(Record::new().with("name", "ana")).await.unwrap();
//!     assert_eq!(db.count().await.unwrap(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::transport::*;
    pub use idbkit_core::{
        create_database, AppendOutcome, CoreError, CursorAction, IndexedDb, LogConfig,
        UpsertOutcome,
    };
    pub use idbkit_host::{DiagnosticLevel, IndexSpec, Key, Record, RequestKind};
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use transport::*;
