//! The record envelope shared by every collection.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque payload fields of a record.
pub type Payload = serde_json::Map<String, Value>;

/// Envelope field names, in their serialized (camelCase) form.
pub const ENVELOPE_FIELDS: [&str; 5] = ["id", "ownerId", "createdAt", "updatedAt", "delFlag"];

/// A stored record: the fixed envelope plus an opaque payload.
///
/// Serializes as one flat camelCase object, so a meal entry reads
/// `{ "id": .., "ownerId": .., "createdAt": .., "dish": .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique id within the collection.
    pub id: String,
    /// Id of the user that owns this record.
    #[serde(default)]
    pub owner_id: String,
    /// Creation time. Absent on legacy records until backfilled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last mutation time. Absent on legacy records until backfilled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Soft-delete marker.
    #[serde(default)]
    pub del_flag: bool,
    /// Domain fields the store does not interpret.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Record {
    /// Returns true unless the record is soft-deleted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.del_flag
    }

    /// Resolves a key path against the record.
    ///
    /// Envelope fields resolve by their camelCase names; anything else is
    /// looked up in the payload, descending into objects on `.`.
    #[must_use]
    pub fn field(&self, key_path: &str) -> Option<Value> {
        match key_path {
            "id" => Some(Value::String(self.id.clone())),
            "ownerId" => Some(Value::String(self.owner_id.clone())),
            "createdAt" => self.created_at.map(Value::from),
            "updatedAt" => self.updated_at.map(Value::from),
            "delFlag" => Some(Value::Bool(self.del_flag)),
            path => {
                let mut parts = path.split('.');
                let first = parts.next()?;
                let mut current = self.payload.get(first)?;
                for part in parts {
                    current = current.get(part)?;
                }
                Some(current.clone())
            }
        }
    }

    /// Applies a shallow partial update.
    ///
    /// Top-level fields in `patch` replace the stored ones wholesale.
    /// `createdAt` and `updatedAt` are managed by the store and ignored.
    /// The id cannot change.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if the patch changes the id or carries a
    /// mistyped envelope field. The record is untouched on error.
    pub fn apply_patch(&mut self, patch: &Payload) -> CoreResult<()> {
        let mut next = self.clone();
        for (key, value) in patch {
            match key.as_str() {
                "id" => {
                    if value.as_str() != Some(self.id.as_str()) {
                        return Err(CoreError::validation(format!(
                            "record id {} cannot change",
                            self.id
                        )));
                    }
                }
                "createdAt" | "updatedAt" => {}
                "ownerId" => {
                    next.owner_id = value
                        .as_str()
                        .ok_or_else(|| CoreError::validation("ownerId must be a string"))?
                        .to_string();
                }
                "delFlag" => {
                    next.del_flag = value
                        .as_bool()
                        .ok_or_else(|| CoreError::validation("delFlag must be a boolean"))?;
                }
                _ => {
                    next.payload.insert(key.clone(), value.clone());
                }
            }
        }
        *self = next;
        Ok(())
    }

    /// Renders the record as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A record to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRecord {
    /// Explicit id. Generated when absent.
    pub id: Option<String>,
    /// Owning user id.
    pub owner_id: String,
    /// Domain fields.
    pub payload: Payload,
}

impl NewRecord {
    /// Creates an empty record owned by `owner_id`.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id: owner_id.into(),
            payload: Payload::new(),
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds one payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Builds the stored record.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if the payload reuses an envelope name or
    /// the explicit id is empty.
    pub(crate) fn into_record(self, generated_id: String, now: Timestamp) -> CoreResult<Record> {
        if let Some(key) = self
            .payload
            .keys()
            .find(|k| ENVELOPE_FIELDS.contains(&k.as_str()))
        {
            return Err(CoreError::validation(format!(
                "payload field {key} is reserved by the record envelope"
            )));
        }
        let id = match self.id {
            Some(id) if id.is_empty() => {
                return Err(CoreError::validation("record id must not be empty"))
            }
            Some(id) => id,
            None => generated_id,
        };
        Ok(Record {
            id,
            owner_id: self.owner_id,
            created_at: Some(now),
            updated_at: Some(now),
            del_flag: false,
            payload: self.payload,
        })
    }
}

/// Generates a record id: creation millis, a dash, 12 random hex digits.
#[must_use]
pub fn generate_id(now: Timestamp) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{now}-{}", &random[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        NewRecord::new("user-1")
            .with_id("meal-1")
            .with_field("dish", "soup")
            .with_field("attachments", json!([{ "id": "a" }]))
            .into_record("unused".into(), 1_000)
            .unwrap()
    }

    #[test]
    fn serializes_flat_camel_case() {
        let value = sample().to_json();
        assert_eq!(value["id"], "meal-1");
        assert_eq!(value["ownerId"], "user-1");
        assert_eq!(value["createdAt"], 1_000);
        assert_eq!(value["delFlag"], false);
        assert_eq!(value["dish"], "soup");
    }

    #[test]
    fn legacy_json_without_timestamps() {
        let record: Record =
            serde_json::from_value(json!({ "id": "old", "ownerId": "u", "note": "hi" })).unwrap();
        assert_eq!(record.created_at, None);
        assert_eq!(record.updated_at, None);
        assert!(!record.del_flag);
        assert_eq!(record.payload["note"], "hi");
        assert!(!record.to_json().as_object().unwrap().contains_key("createdAt"));
    }

    #[test]
    fn field_resolves_envelope_and_nested_payload() {
        let mut record = sample();
        record
            .payload
            .insert("meta".into(), json!({ "place": { "city": "Oslo" } }));

        assert_eq!(record.field("ownerId"), Some(json!("user-1")));
        assert_eq!(record.field("createdAt"), Some(json!(1_000)));
        assert_eq!(record.field("meta.place.city"), Some(json!("Oslo")));
        assert_eq!(record.field("meta.missing"), None);
    }

    #[test]
    fn patch_is_shallow_and_ignores_timestamps() {
        let mut record = sample();
        let patch = json!({
            "attachments": [],
            "createdAt": 5,
            "updatedAt": 5,
            "dish": "stew"
        });
        record.apply_patch(patch.as_object().unwrap()).unwrap();

        assert_eq!(record.payload["attachments"], json!([]));
        assert_eq!(record.payload["dish"], "stew");
        assert_eq!(record.created_at, Some(1_000));
        assert_eq!(record.updated_at, Some(1_000));
    }

    #[test]
    fn patch_cannot_change_id() {
        let mut record = sample();
        let before = record.clone();
        let patch = json!({ "dish": "stew", "id": "other" });

        let err = record.apply_patch(patch.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }));
        assert_eq!(record, before);
    }

    #[test]
    fn patch_with_same_id_is_allowed() {
        let mut record = sample();
        let patch = json!({ "id": "meal-1", "delFlag": true, "ownerId": "user-2" });
        record.apply_patch(patch.as_object().unwrap()).unwrap();
        assert!(record.del_flag);
        assert_eq!(record.owner_id, "user-2");
    }

    #[test]
    fn reserved_payload_names_rejected() {
        let result = NewRecord::new("u")
            .with_field("createdAt", 3)
            .into_record("x".into(), 1);
        assert!(matches!(result, Err(CoreError::ValidationFailed { .. })));
    }

    #[test]
    fn empty_explicit_id_rejected() {
        let result = NewRecord::new("u").with_id("").into_record("x".into(), 1);
        assert!(matches!(result, Err(CoreError::ValidationFailed { .. })));
    }

    #[test]
    fn generated_ids_have_millis_prefix() {
        let id = generate_id(1_700_000_000_000);
        let (millis, random) = id.split_once('-').unwrap();
        assert_eq!(millis, "1700000000000");
        assert_eq!(random.len(), 12);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_id(1), generate_id(1));
    }
}
