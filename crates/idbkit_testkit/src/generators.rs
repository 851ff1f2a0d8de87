//! Property-based test generators using proptest.

use idbkit_host::{Key, Record};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for database and collection names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for primary keys.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        (1i64..10_000).prop_map(Key::Int),
        prop::string::string_regex("[a-z][a-z0-9]{0,11}")
            .expect("Invalid regex")
            .prop_map(Key::Text),
    ]
}

/// Strategy for non-key field values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
    ]
}

/// Strategy for records without a primary key.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map("f_[a-z]{1,6}", value_strategy(), 0..6).prop_map(|fields| {
        fields
            .into_iter()
            .fold(Record::new(), |record, (name, value)| record.with(name, value))
    })
}

/// Strategy for log messages. Commas are excluded since they split records.
pub fn message_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 _.:]{1,24}").expect("Invalid regex")
}
