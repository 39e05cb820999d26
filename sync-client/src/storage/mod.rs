//! Local durable store for sync-client.
//!
//! Holds one record container per entity type, the mutation queue, the
//! dead-letter table, one watermark per entity type and the singleton
//! cached-credential slot. Every operation is durable before it returns.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use novaclub_sync_core::RetryPolicy;
use novaclub_sync_types::{
    DeadLetter, EntityType, QueueEntry, QueueEntryId, Record, RecordId, Timestamp, UserProfile,
};

use crate::error::StorageResult;

/// Where a write comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A user mutation: the write is also queued for replication.
    Local,
    /// A merge of server data: the write is never queued.
    Remote,
}

/// Result of merging one entity type's pulled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records written.
    pub applied: usize,
    /// Records skipped because a local mutation is still queued.
    pub skipped: usize,
    /// Whether the stored watermark moved forward.
    pub watermark_advanced: bool,
}

/// What happened to an entry after an explicit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOutcome {
    /// Still queued; `attempts` rejections so far.
    Requeued {
        /// Rejections so far.
        attempts: u32,
    },
    /// Moved to the dead-letter table.
    DeadLettered,
    /// The entry no longer exists.
    Missing,
}

/// Login data cached after a successful online sign-in.
#[derive(Clone, PartialEq)]
pub struct CachedCredential {
    /// Account email, compared exactly.
    pub email: String,
    /// Argon2id PHC string of the password.
    pub password_hash: String,
    /// Profile returned by the server.
    pub user: UserProfile,
    /// Bearer token of the current session, if still valid.
    pub token: Option<String>,
    /// When the credential was cached.
    pub cached_at: Timestamp,
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("user", &self.user.id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("cached_at", &self.cached_at)
            .finish()
    }
}

/// Trait for local store backends.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get a record; deleted records are invisible.
    async fn get(&self, entity: &EntityType, id: &RecordId) -> StorageResult<Option<Record>>;

    /// Get every visible record of an entity type, in no particular order.
    async fn get_all(&self, entity: &EntityType) -> StorageResult<Vec<Record>>;

    /// Upsert a record and return it as stored.
    ///
    /// With [`Origin::Local`] the record is stamped with the client clock
    /// and a queue entry carrying the full record is appended in the same
    /// transaction.
    async fn put(&self, entity: &EntityType, record: Record, origin: Origin)
        -> StorageResult<Record>;

    /// Delete a record.
    ///
    /// With [`Origin::Local`] the record is hidden and a deletion entry is
    /// appended in the same transaction; the hidden row is erased once
    /// the deletion is acknowledged. With [`Origin::Remote`] the row is
    /// erased immediately.
    async fn delete(&self, entity: &EntityType, id: &RecordId, origin: Origin)
        -> StorageResult<()>;

    /// Append a queue entry without touching the record container.
    async fn enqueue(
        &self,
        entity: &EntityType,
        id: &RecordId,
        payload: Option<Value>,
    ) -> StorageResult<QueueEntryId>;

    /// Merge one pulled batch and advance the watermark, in one transaction.
    ///
    /// Records that still have queued entries are skipped, and a batch with
    /// skipped records leaves the watermark where it was.
    async fn apply_remote_batch(
        &self,
        entity: &EntityType,
        records: Vec<Record>,
        watermark: Timestamp,
    ) -> StorageResult<MergeOutcome>;

    /// Every queued entry in queue order.
    async fn queued_entries(&self) -> StorageResult<Vec<QueueEntry>>;

    /// Remove acknowledged entries; returns how many were removed.
    async fn acknowledge(&self, ids: &[QueueEntryId]) -> StorageResult<usize>;

    /// Count an explicit rejection against an entry.
    async fn record_rejection(
        &self,
        id: QueueEntryId,
        reason: &str,
        policy: RetryPolicy,
    ) -> StorageResult<RejectionOutcome>;

    /// Every dead-lettered entry, oldest first.
    async fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>>;

    /// Move a dead letter back into the queue with a fresh attempt count.
    ///
    /// The entry keeps its original queue position. Returns its id, or
    /// `None` if no such dead letter exists.
    async fn requeue_dead_letter(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntryId>>;

    /// Ids of records of an entity type that have queued entries.
    async fn pending_record_ids(&self, entity: &EntityType) -> StorageResult<BTreeSet<RecordId>>;

    /// Current watermark of an entity type.
    async fn watermark(&self, entity: &EntityType) -> StorageResult<Option<Timestamp>>;

    /// Every stored watermark.
    async fn watermarks(&self) -> StorageResult<BTreeMap<EntityType, Timestamp>>;

    /// The cached credential, if any.
    async fn cached_credential(&self) -> StorageResult<Option<CachedCredential>>;

    /// Replace the cached credential.
    async fn save_credential(&self, credential: &CachedCredential) -> StorageResult<()>;

    /// Erase the cached credential.
    async fn clear_credential(&self) -> StorageResult<()>;

    /// Update the token stored with the cached credential.
    async fn set_session_token(&self, token: Option<&str>) -> StorageResult<()>;
}
