//! Records and queue entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EntityType, QueueEntryId, RecordId, SyncError, TenantId, Timestamp};

/// An application record (member, payment, license, ...).
///
/// Only the identity, tenant and last-modified columns are typed; every
/// other column travels untouched in `fields`. The tenant column is named
/// `club_id` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated stable identifier.
    pub id: RecordId,
    /// Owning tenant, stamped by the server if absent.
    #[serde(
        rename = "club_id",
        alias = "tenant_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_id: Option<TenantId>,
    /// Last-modified time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Remaining columns.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record with the given id.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            tenant_id: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    /// Set a column value (builder style).
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Set the tenant (builder style).
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    /// Read a column value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Encode as the JSON object sent to the server.
    pub fn to_payload(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a JSON object; it must carry an `id`.
    pub fn from_payload(payload: Value) -> Result<Self, SyncError> {
        if !payload.is_object() {
            return Err(SyncError::InvalidRecord("payload is not an object".into()));
        }
        serde_json::from_value(payload).map_err(|e| SyncError::InvalidRecord(e.to_string()))
    }
}

/// A durably recorded intent to replicate one local mutation.
///
/// `payload == None` means the record was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue position (FIFO order).
    pub id: QueueEntryId,
    /// Entity type of the mutated record.
    pub entity_type: EntityType,
    /// The mutated record.
    pub record_id: RecordId,
    /// Full record snapshot, or `None` for a deletion.
    pub payload: Option<Value>,
    /// Client time of the local mutation.
    pub enqueued_at: Timestamp,
    /// Number of explicit server rejections so far.
    pub attempts: u32,
    /// Message of the most recent rejection.
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Check if this entry replicates a deletion.
    pub fn is_deletion(&self) -> bool {
        self.payload.is_none()
    }
}

/// A queue entry evicted after too many rejections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The evicted entry, as it was when evicted.
    pub entry: QueueEntry,
    /// Final rejection message.
    pub reason: String,
    /// When the entry was evicted.
    pub dead_lettered_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_decodes_server_row() {
        let record = Record::from_payload(json!({
            "id": "m-1",
            "club_id": "club-9",
            "first_name": "Aiko",
            "belt_level": "brown",
            "updated_at": "2024-01-15T10:30:00.5+00:00"
        }))
        .unwrap();

        assert_eq!(record.id, RecordId::new("m-1"));
        assert_eq!(record.tenant_id, Some(TenantId::new("club-9")));
        assert!(record.updated_at.is_some());
        assert_eq!(record.field("first_name"), Some(&json!("Aiko")));
        assert!(record.field("club_id").is_none());
    }

    #[test]
    fn record_accepts_tenant_id_alias() {
        let record = Record::from_payload(json!({"id": "p-1", "tenant_id": "club-1"})).unwrap();
        assert_eq!(record.tenant_id, Some(TenantId::new("club-1")));
    }

    #[test]
    fn record_payload_uses_club_id_column() {
        let record = Record::new(RecordId::new("m-2"))
            .with_tenant(TenantId::new("club-3"))
            .with_field("first_name", "Kenji");
        let payload = record.to_payload().unwrap();

        assert_eq!(payload["club_id"], json!("club-3"));
        assert_eq!(payload["first_name"], json!("Kenji"));
        assert!(payload.get("updated_at").is_none());
    }

    #[test]
    fn record_without_id_is_invalid() {
        let result = Record::from_payload(json!({"first_name": "Nobody"}));
        assert!(matches!(result, Err(SyncError::InvalidRecord(_))));
    }

    #[test]
    fn non_object_payload_is_invalid() {
        assert!(Record::from_payload(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn queue_entry_null_payload_is_deletion() {
        let entry = QueueEntry {
            id: QueueEntryId::new(1),
            entity_type: EntityType::new("members").unwrap(),
            record_id: RecordId::new("m-1"),
            payload: None,
            enqueued_at: Timestamp::now(),
            attempts: 0,
            last_error: None,
        };
        assert!(entry.is_deletion());
    }
}
