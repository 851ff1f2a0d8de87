//! Database and log buffer configuration.

use crate::error::{CoreError, CoreResult};
use idbkit_host::{CollectionSchema, ID_FIELD};
use serde::{Deserialize, Serialize};

/// Configuration for opening a database.
///
/// The primary key always lives in the [`ID_FIELD`] field, where
/// [`Record`](idbkit_host::Record) keeps its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DbConfig {
    /// Schema version requested on every open.
    pub schema_version: u32,

    /// Whether the host assigns primary keys.
    pub auto_increment: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            auto_increment: true,
        }
    }
}

impl DbConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema version. Raising it re-runs the upgrade phase.
    #[must_use]
    pub const fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets whether the host assigns primary keys.
    #[must_use]
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Collection layout created during upgrades.
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            key_path: ID_FIELD.to_string(),
            auto_increment: self.auto_increment,
        }
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Fails for a zero schema version.
    pub fn validate(&self) -> CoreResult<()> {
        if self.schema_version == 0 {
            return Err(CoreError::invalid_operation("schema version must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration of a [`LogBuffer`](crate::LogBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Storage key holding the comma-joined records.
    pub records_key: String,

    /// Storage key holding the send authorization flag.
    pub authorization_key: String,

    /// Record count that triggers a flush. Never reached while buffered.
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            records_key: "idbkit.log".to_string(),
            authorization_key: "idbkit.log.authorized".to_string(),
            capacity: 100,
        }
    }
}

impl LogConfig {
    /// Creates a configuration for the given storage keys and capacity.
    pub fn new(
        records_key: impl Into<String>,
        authorization_key: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            records_key: records_key.into(),
            authorization_key: authorization_key.into(),
            capacity,
        }
    }

    /// Sets the flush capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Fails when the capacity is zero, a key is empty, or both keys are
    /// the same.
    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(CoreError::invalid_operation("log capacity must be at least 1"));
        }
        if self.records_key.is_empty() || self.authorization_key.is_empty() {
            return Err(CoreError::invalid_operation("log storage keys must not be empty"));
        }
        if self.records_key == self.authorization_key {
            return Err(CoreError::invalid_operation(
                "records and authorization must use different storage keys",
            ));
        }
        Ok(())
    }
}
