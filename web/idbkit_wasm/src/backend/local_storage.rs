//! Key/value store over `window.localStorage`.

use super::convert::js_error;
use crate::error::{WasmError, WasmResult};
use idbkit_host::{HostResult, KeyValueStore};
use web_sys::Storage;

/// A [`KeyValueStore`] backed by `localStorage`.
#[derive(Debug, Clone)]
pub struct LocalStorageStore {
    storage: Storage,
}

impl LocalStorageStore {
    /// Uses the current window's `localStorage`.
    pub fn from_window() -> WasmResult<Self> {
        let window =
            web_sys::window().ok_or_else(|| WasmError::NotSupported("no window".into()))?;
        let storage = window
            .local_storage()?
            .ok_or_else(|| WasmError::NotSupported("localStorage not available".into()))?;
        Ok(Self { storage })
    }

    /// Removes a key.
    pub fn remove(&self, key: &str) -> HostResult<()> {
        self.storage.remove_item(key).map_err(js_error)
    }
}

impl KeyValueStore for LocalStorageStore {
    fn read(&self, key: &str) -> HostResult<Option<String>> {
        self.storage.get_item(key).map_err(js_error)
    }

    fn write(&self, key: &str, value: &str) -> HostResult<()> {
        self.storage.set_item(key, value).map_err(js_error)
    }
}
