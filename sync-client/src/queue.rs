//! Mutation queue manager.
//!
//! The queue lives in the local store. Record writes enqueue in the same
//! transaction as the write itself; this type reads, resolves and
//! evicts entries on behalf of the sync engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use novaclub_sync_core::{PushBatch, RetryPolicy};
use novaclub_sync_types::{DeadLetter, EntityType, QueueEntry, QueueEntryId, RecordId};
use serde_json::Value;

use crate::error::StorageResult;
use crate::storage::{LocalStore, RejectionOutcome};

/// Mutation queue over a [`LocalStore`].
pub struct MutationQueue<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S> Clone for MutationQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }
}

impl<S: LocalStore> MutationQueue<S> {
    /// Create a queue manager.
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Retry policy applied to rejections.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Record intent to replicate a mutation without writing the record.
    pub async fn enqueue(
        &self,
        entity: &EntityType,
        id: &RecordId,
        payload: Option<Value>,
    ) -> StorageResult<QueueEntryId> {
        self.store.enqueue(entity, id, payload).await
    }

    /// Every queued entry grouped by entity type, FIFO within a type.
    ///
    /// Nothing is removed.
    pub async fn drain(&self) -> StorageResult<BTreeMap<EntityType, Vec<QueueEntry>>> {
        let mut grouped: BTreeMap<EntityType, Vec<QueueEntry>> = BTreeMap::new();
        for entry in self.store.queued_entries().await? {
            grouped
                .entry(entry.entity_type.clone())
                .or_default()
                .push(entry);
        }
        Ok(grouped)
    }

    /// Snapshot of the queue as a push batch.
    pub async fn batch(&self) -> StorageResult<PushBatch> {
        Ok(PushBatch::new(self.drain().await?))
    }

    /// Remove entries the server confirmed.
    pub async fn acknowledge(&self, ids: &[QueueEntryId]) -> StorageResult<usize> {
        let removed = self.store.acknowledge(ids).await?;
        tracing::debug!("Acknowledged {} queue entries", removed);
        Ok(removed)
    }

    /// Count an explicit rejection; dead-letters the entry at the attempt limit.
    pub async fn reject(&self, id: QueueEntryId, reason: &str) -> StorageResult<RejectionOutcome> {
        let outcome = self.store.record_rejection(id, reason, self.policy).await?;
        match outcome {
            RejectionOutcome::Requeued { attempts } => {
                tracing::warn!(
                    "Queue entry {} rejected ({}/{}): {}",
                    id,
                    attempts,
                    self.policy.max_attempts(),
                    reason
                );
            }
            RejectionOutcome::DeadLettered => {
                tracing::error!("Queue entry {} dead-lettered: {}", id, reason);
            }
            RejectionOutcome::Missing => {
                tracing::debug!("Rejected queue entry {} no longer exists", id);
            }
        }
        Ok(outcome)
    }

    /// Number of queued entries.
    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.store.queued_entries().await?.len())
    }

    /// Check if nothing is queued.
    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Number of queued entries per entity type.
    pub async fn depth_by_entity(&self) -> StorageResult<BTreeMap<EntityType, usize>> {
        Ok(self
            .drain()
            .await?
            .into_iter()
            .map(|(entity, entries)| (entity, entries.len()))
            .collect())
    }

    /// Dead-lettered entries, oldest first.
    pub async fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        self.store.dead_letters().await
    }

    /// Put a dead letter back in the queue.
    pub async fn requeue(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntryId>> {
        let requeued = self.store.requeue_dead_letter(id).await?;
        if requeued.is_some() {
            tracing::info!("Requeued dead letter {}", id);
        }
        Ok(requeued)
    }
}
