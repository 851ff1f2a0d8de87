//! # idbkit WASM
//!
//! WebAssembly bindings for idbkit over the browser's own storage.
//!
//! This crate provides:
//! - an IndexedDB host for the idbkit query façade
//! - a `localStorage`-backed bounded log with a pluggable send function
//! - console diagnostics
//! - a JavaScript-friendly API via wasm-bindgen
//!
//! ## Usage
//!
//! ```javascript
//! import init, { Log, createDatabase } from 'idbkit_wasm';
//!
//! async function main() {
//!     await init();
//!
//!     const log = new Log("app.log", "app.log.allowed", 100, (payload) => {
//!         navigator.sendBeacon("/logs", payload);
//!     });
//!     const db = await createDatabase("shop", "orders", [], log);
//!
//!     await db.upsert({ ref: "A-1", total: 12 });
//!     console.log(await db.count());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod database;
mod error;
mod log;
mod utils;

pub use backend::{ConsoleSink, IdbFactoryHost, LocalStorageStore};
pub use database::*;
pub use error::*;
pub use log::*;

use wasm_bindgen::prelude::*;

/// Initialize the WASM module.
///
/// This sets up panic hooks for better error messages in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}
