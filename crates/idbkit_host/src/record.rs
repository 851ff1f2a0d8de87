//! Keys and records.

use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the primary-key field inside a record object.
pub const ID_FIELD: &str = "id";

/// A primary or secondary key.
///
/// Integers sort before strings, matching browser key ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key, as produced by the auto-increment generator.
    Int(i64),
    /// String key.
    Text(String),
}

impl Key {
    /// Reads a key out of a JSON value.
    ///
    /// Returns `None` for values that cannot act as keys (floats, objects,
    /// arrays, booleans, null).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the key into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

/// A stored record: an optional primary key plus free-form fields.
///
/// The primary key lives in the `id` field of the record's JSON form. A
/// record without an id has one assigned by the host on insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub struct Record {
    id: Option<Key>,
    fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty record without a primary key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the primary key.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Key>) -> Self {
        self.set_id(id.into());
        self
    }

    /// Sets a field, returning the record for chaining.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns the primary key, if assigned.
    pub fn id(&self) -> Option<&Key> {
        self.id.as_ref()
    }

    /// Replaces the primary key.
    pub fn set_id(&mut self, id: Key) {
        self.fields.remove(ID_FIELD);
        self.id = Some(id);
    }

    /// Sets a field. Setting `id` through here sets the primary key; `null`
    /// clears it.
    ///
    /// An `id` that cannot be a key (a float, bool, array or object) is kept
    /// as a plain field and the record has no primary key. Hosts reject such
    /// a record on write, and [`Record::from_json`] rejects its JSON form.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        if field != ID_FIELD {
            self.fields.insert(field, value);
            return;
        }
        self.id = Key::from_json(&value);
        if self.id.is_some() || value.is_null() {
            self.fields.remove(ID_FIELD);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Returns a field value. `id` is answered from the primary key, or
    /// from the raw value when it is not a valid key.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == ID_FIELD {
            if let Some(id) = &self.id {
                return Some(id.to_json());
            }
        }
        self.fields.get(field).cloned()
    }

    /// Returns the non-key fields, including an `id` that is not a valid
    /// key.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Converts the record into a JSON object.
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(id) = &self.id {
            object.insert(ID_FIELD.to_string(), id.to_json());
        }
        Value::Object(object)
    }

    /// Builds a record from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Data`] if the value is not an object or its `id`
    /// is neither an integer nor a string.
    pub fn from_json(value: Value) -> HostResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(HostError::Data(format!("record must be an object, got {value}")));
        };
        let id = match fields.remove(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                Key::from_json(&raw)
                    .ok_or_else(|| HostError::Data(format!("invalid record id: {raw}")))?,
            ),
        };
        Ok(Self { id, fields })
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.to_json()
    }
}

impl TryFrom<Value> for Record {
    type Error = HostError;

    fn try_from(value: Value) -> HostResult<Self> {
        Record::from_json(value)
    }
}
