use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Handle to a freshly written document. Callers derive identifiers from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

/// A stored document: the store-assigned id plus the JSON object body.
/// The id is never part of `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    /// Decode the body into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }
}

// -- Users --

/// Write shape of a user document. Nothing here is validated: email
/// format and uniqueness are left to whoever reads the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub email: String,
}

/// A user as read back from the store, with its document id attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub email: String,
}

impl UserRecord {
    pub fn from_new(id: impl Into<String>, user: NewUser) -> Self {
        Self {
            id: id.into(),
            first_name: user.first_name,
            last_name: user.last_name,
            birthdate: user.birthdate,
            email: user.email,
        }
    }
}

// -- Messages --

/// A caller-assembled message. Only the routing fields and `sent_on` are
/// typed; everything else (body, attachments, ...) rides along untouched
/// in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender_id: String,
    pub recipient_id: String,
    /// Stored as epoch milliseconds so the store orders it numerically.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_on: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl MessageRecord {
    pub fn new(sender_id: impl Into<String>, recipient_id: impl Into<String>, sent_on: DateTime<Utc>) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            sent_on,
            payload: Map::new(),
        }
    }

    /// Attach an opaque payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// A message as it appears in a conversation: the record plus the id the
/// store assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    #[serde(flatten)]
    pub message: MessageRecord,
}

impl ConversationMessage {
    /// Build from a stored document. The store id wins over any `id` key in
    /// the payload.
    pub fn from_document(doc: &Document) -> serde_json::Result<Self> {
        let mut message: MessageRecord = doc.decode()?;
        message.payload.remove("id");
        Ok(Self {
            id: doc.id.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn message_payload_is_flattened() {
        let msg = MessageRecord::new("alice", "bob", ts(1_700_000_000_000)).with_field("body", "hi");

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "sender_id": "alice",
                "recipient_id": "bob",
                "sent_on": 1_700_000_000_000i64,
                "body": "hi",
            })
        );
    }

    #[test]
    fn conversation_message_prefers_store_id() {
        let doc = Document {
            id: "store-id".into(),
            data: json!({
                "id": "payload-id",
                "sender_id": "a",
                "recipient_id": "b",
                "sent_on": 5,
                "body": "yo",
            })
            .as_object()
            .unwrap()
            .clone(),
        };

        let msg = ConversationMessage::from_document(&doc).unwrap();
        assert_eq!(msg.id, "store-id");
        assert!(!msg.message.payload.contains_key("id"));
        assert_eq!(msg.message.payload["body"], "yo");
        assert_eq!(msg.message.sent_on, ts(5));

        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["id"], "store-id");
    }

    #[test]
    fn birthdate_stored_as_calendar_date() {
        let user = NewUser {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            birthdate: NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
            email: "ada@example.com".into(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["birthdate"], "1815-12-10");
    }
}
