//! Browser implementations of the idbkit host capabilities.
//!
//! - [`IdbFactoryHost`] over `window.indexedDB`
//! - [`LocalStorageStore`] over `window.localStorage`
//! - [`ConsoleSink`] over `console`

mod console;
mod convert;
mod indexeddb;
mod local_storage;

pub use console::ConsoleSink;
pub use convert::{describe, key_from_js, key_to_js, record_from_js, record_to_js};
pub use indexeddb::IdbFactoryHost;
pub use local_storage::LocalStorageStore;
