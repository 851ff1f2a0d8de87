//! Database descriptors.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Names the database and the collection inside it that an operation
/// targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseDescriptor {
    name: String,
    collection: String,
}

impl DatabaseDescriptor {
    /// Creates a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDescriptor`] if either name is empty.
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let collection = collection.into();
        if name.is_empty() {
            return Err(CoreError::invalid_descriptor("database name is empty"));
        }
        if collection.is_empty() {
            return Err(CoreError::invalid_descriptor(format!(
                "collection name is empty for database {name}"
            )));
        }
        Ok(Self { name, collection })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for DatabaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.collection)
    }
}
