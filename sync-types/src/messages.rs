//! Request and response bodies exchanged with the remote service.
//!
//! All bodies are JSON. Push and pull are keyed by entity type; each
//! entity type is ordered and acknowledged independently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::{EntityType, Record, RecordId, TenantId, Timestamp};

/// One replicated mutation inside a push batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushChange {
    /// Record identifier.
    pub id: RecordId,
    /// Full record, or `null` for a deletion.
    pub data: Option<Value>,
}

/// Body of `POST /sync/push`: entity type → ordered list of changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushRequest {
    /// Changes grouped by entity type, each list in enqueue order.
    pub changes: BTreeMap<EntityType, Vec<PushChange>>,
}

impl PushRequest {
    /// Total number of changes across all entity types.
    pub fn len(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    /// Check if the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A change the server reports as accepted.
///
/// The server may report either `{entity, id, action}` objects or bare
/// record ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcceptedChange {
    /// Accepted change with its entity type.
    Detailed {
        /// Entity type of the change.
        entity: EntityType,
        /// Record identifier.
        id: RecordId,
        /// What the server did (`created`, `updated`, `deleted`).
        #[serde(default)]
        action: Option<String>,
    },
    /// Bare record id, valid for any entity type.
    Id(RecordId),
}

impl AcceptedChange {
    /// Check if this acknowledgement covers the given record.
    pub fn matches(&self, entity: &EntityType, id: &RecordId) -> bool {
        match self {
            Self::Detailed {
                entity: e, id: i, ..
            } => e == entity && i == id,
            Self::Id(i) => i == id,
        }
    }

    /// Whether the server reported a deletion, if it said what it did.
    pub fn is_deletion(&self) -> Option<bool> {
        match self {
            Self::Detailed {
                action: Some(action),
                ..
            } => Some(action == "deleted"),
            _ => None,
        }
    }
}

/// A change the server explicitly rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedChange {
    /// Entity type, when reported.
    #[serde(default)]
    pub entity: Option<EntityType>,
    /// Record identifier, when reported.
    #[serde(default)]
    pub id: Option<RecordId>,
    /// Server-side error message.
    #[serde(default)]
    pub error: String,
}

impl RejectedChange {
    /// Check if this rejection covers the given record.
    pub fn matches(&self, entity: &EntityType, id: &RecordId) -> bool {
        self.id.as_ref() == Some(id) && self.entity.as_ref().map_or(true, |e| e == entity)
    }
}

/// Per-change results of a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResults {
    /// Accepted changes.
    #[serde(default)]
    pub success: Vec<AcceptedChange>,
    /// Rejected changes.
    #[serde(default)]
    pub errors: Vec<RejectedChange>,
}

/// Response of `POST /sync/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Per-change results.
    pub results: PushResults,
    /// Server time of the push, when reported.
    #[serde(default)]
    pub sync_timestamp: Option<Timestamp>,
}

/// Body of `POST /sync/pull`: entity type → last merged watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullRequest {
    /// Watermark per entity type, `None` for a first sync.
    pub watermarks: BTreeMap<EntityType, Option<Timestamp>>,
}

/// One record inside a pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulledRecord {
    /// The full record.
    pub data: Record,
}

/// Response of `POST /sync/pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Records modified after the requested watermarks.
    #[serde(default)]
    pub changes: BTreeMap<EntityType, Vec<PulledRecord>>,
    /// Server time the response was computed at; becomes the new watermark.
    pub sync_timestamp: Timestamp,
}

impl PullResponse {
    /// Total number of records across all entity types.
    pub fn record_count(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }
}

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Response of `POST /auth/login`.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub access_token: String,
    /// Token type (always `bearer`).
    #[serde(default)]
    pub token_type: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Profile returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: String,
    /// Account email.
    pub email: String,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Tenant the user belongs to.
    #[serde(default)]
    pub club_id: Option<TenantId>,
    /// Role within the tenant.
    #[serde(default)]
    pub role: Option<String>,
    /// Any other profile fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured error body (`{"detail": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// A message string or a list of validation errors.
    pub detail: Value,
}

impl ErrorBody {
    /// Human-readable message.
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}
