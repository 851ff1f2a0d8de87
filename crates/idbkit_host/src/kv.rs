//! Key/value store capability.

use crate::error::{HostError, HostResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Persistent string storage keyed by name.
///
/// Writes replace the previous value. There is no locking across calls:
/// two read-modify-write sequences on the same key can interleave.
pub trait KeyValueStore {
    /// Reads the value under `key`, or `None` if absent.
    fn read(&self, key: &str) -> HostResult<Option<String>>;

    /// Writes `value` under `key`.
    fn write(&self, key: &str, value: &str) -> HostResult<()>;
}

/// Serializes `value` as JSON and writes it under `key`.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn store_object<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> HostResult<()> {
    let data = serde_json::to_string(value)?;
    store.write(key, &data)
}

/// Reads the JSON stored under `key` back into a value.
///
/// # Errors
///
/// Returns [`HostError::NotFound`] if nothing (or an empty string) is
/// stored under `key`, and [`HostError::Data`] if the JSON does not match.
pub fn load_object<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> HostResult<T> {
    match store.read(key)? {
        Some(data) if !data.is_empty() => Ok(serde_json::from_str(&data)?),
        _ => Err(HostError::NotFound(format!(
            "invalid storage operation: no item {key}"
        ))),
    }
}

/// An in-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a key.
    pub fn remove(&self, key: &str) {
        self.items.write().remove(key);
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> HostResult<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> HostResult<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        volume: u8,
    }

    #[test]
    fn write_replaces_value() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.read("k").unwrap(), None);

        store.write("k", "a").unwrap();
        store.write("k", "b").unwrap();
        assert_eq!(store.read("k").unwrap().as_deref(), Some("b"));
        assert_eq!(store.len(), 1);

        store.remove("k");
        assert!(store.is_empty());
    }

    #[test]
    fn objects_round_trip_through_json() {
        let store = MemoryKeyValueStore::new();
        let settings = Settings {
            theme: "dark".into(),
            volume: 7,
        };
        store_object(&store, "settings", &settings).unwrap();

        let loaded: Settings = load_object(&store, "settings").unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn loading_missing_object_fails() {
        let store = MemoryKeyValueStore::new();
        let result: HostResult<Settings> = load_object(&store, "missing");
        assert!(matches!(result, Err(HostError::NotFound(_))));

        store.write("empty", "").unwrap();
        let result: HostResult<Settings> = load_object(&store, "empty");
        assert!(matches!(result, Err(HostError::NotFound(_))));
    }

    #[test]
    fn loading_mismatched_object_fails() {
        let store = MemoryKeyValueStore::new();
        store.write("settings", "[1,2,3]").unwrap();
        let result: HostResult<Settings> = load_object(&store, "settings");
        assert!(matches!(result, Err(HostError::Data(_))));
    }
}
