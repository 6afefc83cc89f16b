//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records that respect the envelope's
//! invariants: payload keys never collide with envelope fields.

use keepsake_core::{NewRecord, Payload, ENVELOPE_FIELDS};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for generating owner ids.
pub fn owner_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("user-[a-z0-9]{1,8}").expect("Invalid regex")
}

/// Strategy for generating payload keys that are not envelope fields.
pub fn payload_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Payload key must not shadow the envelope", |k| {
            !ENVELOPE_FIELDS.contains(&k.as_str())
        })
}

/// Strategy for generating scalar JSON values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::String),
        Just(Value::Null),
    ]
}

/// Strategy for generating payloads of up to `max_fields` scalar fields.
pub fn payload_strategy(max_fields: usize) -> impl Strategy<Value = Payload> {
    prop::collection::btree_map(payload_key_strategy(), scalar_value_strategy(), 0..=max_fields)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating records to insert, with generated ids.
pub fn new_record_strategy() -> impl Strategy<Value = NewRecord> {
    (owner_strategy(), payload_strategy(6))
        .prop_map(|(owner, payload)| NewRecord::new(owner).with_payload(payload))
}
