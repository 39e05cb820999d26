//! Push batch building and resolution for novaclub sync.
//!
//! A [`PushBatch`] is a snapshot of the mutation queue taken at the start
//! of the Push phase. It builds the request body (one ordered list per
//! entity type) and, once the server answers, resolves every submitted
//! entry into exactly one of:
//!
//! - acknowledged: the server listed it as accepted
//! - superseded: a later entry for the same record was accepted
//! - rejected: the server listed it as an error
//! - unresolved: the server said nothing about it
//!
//! Only acknowledged and superseded entries may leave the queue.

use std::collections::BTreeMap;

use novaclub_sync_types::{
    EntityType, PushChange, PushRequest, PushResponse, QueueEntry, QueueEntryId,
};

/// Default number of explicit rejections before an entry is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reason recorded when the server rejects an entry without a message.
const DEFAULT_REJECTION: &str = "rejected by server";

/// Queued entries submitted in one Push phase, grouped by entity type.
#[derive(Debug, Clone, Default)]
pub struct PushBatch {
    entries: BTreeMap<EntityType, Vec<QueueEntry>>,
}

impl PushBatch {
    /// Build a batch from entries already grouped by entity type.
    ///
    /// Each group is sorted by queue position so submission order is
    /// enqueue order. Empty groups are dropped.
    pub fn new(grouped: BTreeMap<EntityType, Vec<QueueEntry>>) -> Self {
        let entries = grouped
            .into_iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(entity, mut list)| {
                list.sort_by_key(|e| e.id);
                (entity, list)
            })
            .collect();
        Self { entries }
    }

    /// Build a batch from a flat list of entries.
    pub fn from_entries(entries: Vec<QueueEntry>) -> Self {
        let mut grouped: BTreeMap<EntityType, Vec<QueueEntry>> = BTreeMap::new();
        for entry in entries {
            grouped
                .entry(entry.entity_type.clone())
                .or_default()
                .push(entry);
        }
        Self::new(grouped)
    }

    /// Number of entries in the batch.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries, entity type by entity type.
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values().flatten()
    }

    /// The request body for `POST /sync/push`.
    pub fn request(&self) -> PushRequest {
        let changes = self
            .entries
            .iter()
            .map(|(entity, list)| {
                let changes = list
                    .iter()
                    .map(|entry| PushChange {
                        id: entry.record_id.clone(),
                        data: entry.payload.clone(),
                    })
                    .collect();
                (entity.clone(), changes)
            })
            .collect();
        PushRequest { changes }
    }

    /// Match the server's answer against the submitted entries.
    ///
    /// Each acknowledgement or rejection claims the earliest unclaimed
    /// entry for the same `(entity, id)`, so an update followed by a delete
    /// of the same record needs two acknowledgements. When the server says
    /// what it did (`deleted` or not), the acknowledgement prefers an entry
    /// of that kind. An accepted entry supersedes every earlier entry for
    /// the same record that was not itself accepted.
    pub fn resolve(&self, response: &PushResponse) -> BatchOutcome {
        let flat: Vec<&QueueEntry> = self.entries().collect();
        let mut status = vec![Resolution::Unresolved; flat.len()];
        let mut reasons: BTreeMap<usize, String> = BTreeMap::new();

        for accepted in &response.results.success {
            let kind = accepted.is_deletion();
            let slot = first_unclaimed(&flat, &status, |entry| {
                accepted.matches(&entry.entity_type, &entry.record_id)
                    && kind.map_or(true, |deleted| deleted == entry.is_deletion())
            })
            .or_else(|| {
                first_unclaimed(&flat, &status, |entry| {
                    accepted.matches(&entry.entity_type, &entry.record_id)
                })
            });
            if let Some(i) = slot {
                status[i] = Resolution::Acknowledged;
            }
        }

        for rejected in &response.results.errors {
            let slot = first_unclaimed(&flat, &status, |entry| {
                rejected.matches(&entry.entity_type, &entry.record_id)
            });
            if let Some(i) = slot {
                status[i] = Resolution::Rejected;
                let reason = if rejected.error.is_empty() {
                    DEFAULT_REJECTION.to_string()
                } else {
                    rejected.error.clone()
                };
                reasons.insert(i, reason);
            }
        }

        for later in 0..flat.len() {
            if status[later] != Resolution::Acknowledged {
                continue;
            }
            for earlier in 0..later {
                if status[earlier] != Resolution::Acknowledged
                    && flat[earlier].entity_type == flat[later].entity_type
                    && flat[earlier].record_id == flat[later].record_id
                {
                    status[earlier] = Resolution::Superseded;
                    reasons.remove(&earlier);
                }
            }
        }

        let mut outcome = BatchOutcome::default();
        for (i, entry) in flat.iter().enumerate() {
            match status[i] {
                Resolution::Acknowledged => outcome.acknowledged.push(entry.id),
                Resolution::Superseded => outcome.superseded.push(entry.id),
                Resolution::Rejected => {
                    let reason = reasons
                        .remove(&i)
                        .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
                    outcome.rejected.push((entry.id, reason));
                }
                Resolution::Unresolved => outcome.unresolved.push(entry.id),
            }
        }
        outcome
    }
}

fn first_unclaimed(
    flat: &[&QueueEntry],
    status: &[Resolution],
    pred: impl Fn(&QueueEntry) -> bool,
) -> Option<usize> {
    flat.iter()
        .zip(status)
        .position(|(entry, s)| *s == Resolution::Unresolved && pred(entry))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Unresolved,
    Acknowledged,
    Superseded,
    Rejected,
}

/// How each submitted entry was resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries the server accepted.
    pub acknowledged: Vec<QueueEntryId>,
    /// Entries made obsolete by a later accepted entry for the same record.
    pub superseded: Vec<QueueEntryId>,
    /// Entries the server rejected, with the server's message.
    pub rejected: Vec<(QueueEntryId, String)>,
    /// Entries the server did not mention.
    pub unresolved: Vec<QueueEntryId>,
}

impl BatchOutcome {
    /// Entries that may be removed from the queue.
    pub fn removable(&self) -> Vec<QueueEntryId> {
        let mut ids: Vec<QueueEntryId> = self
            .acknowledged
            .iter()
            .chain(self.superseded.iter())
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

/// What to do with an entry after an explicit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the entry queued for the next cycle.
    Retry,
    /// Move the entry to the dead-letter table.
    DeadLetter,
}

/// Bounded retry for entries the server keeps rejecting.
///
/// Only explicit rejections count as attempts. Connectivity failures and
/// entries the server did not mention never consume an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum number of explicit rejections.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide given the attempt count *including* the rejection just received.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novaclub_sync_types::{AcceptedChange, PushResults, RecordId, RejectedChange, Timestamp};
    use serde_json::{json, Value};

    fn entity(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    fn entry(seq: i64, entity_name: &str, id: &str, payload: Option<Value>) -> QueueEntry {
        QueueEntry {
            id: QueueEntryId::new(seq),
            entity_type: entity(entity_name),
            record_id: RecordId::new(id),
            payload,
            enqueued_at: Timestamp::now(),
            attempts: 0,
            last_error: None,
        }
    }

    fn accepted(entity_name: &str, id: &str, action: Option<&str>) -> AcceptedChange {
        AcceptedChange::Detailed {
            entity: entity(entity_name),
            id: RecordId::new(id),
            action: action.map(str::to_string),
        }
    }

    fn rejected(entity_name: &str, id: &str, error: &str) -> RejectedChange {
        RejectedChange {
            entity: Some(entity(entity_name)),
            id: Some(RecordId::new(id)),
            error: error.to_string(),
        }
    }

    fn response(success: Vec<AcceptedChange>, errors: Vec<RejectedChange>) -> PushResponse {
        PushResponse {
            results: PushResults { success, errors },
            sync_timestamp: None,
        }
    }

    fn ids(values: &[i64]) -> Vec<QueueEntryId> {
        values.iter().copied().map(QueueEntryId::new).collect()
    }

    #[test]
    fn request_preserves_enqueue_order_per_entity() {
        let batch = PushBatch::from_entries(vec![
            entry(3, "members", "m-1", None),
            entry(1, "members", "m-1", Some(json!({"id": "m-1", "v": 1}))),
            entry(2, "payments", "p-1", Some(json!({"id": "p-1"}))),
        ]);

        let req = batch.request();
        let members = &req.changes[&entity("members")];
        assert_eq!(members.len(), 2);
        assert!(members[0].data.is_some(), "update must come first");
        assert!(members[1].data.is_none(), "delete must come second");
        assert_eq!(req.changes[&entity("payments")].len(), 1);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn empty_groups_are_dropped() {
        let mut grouped = BTreeMap::new();
        grouped.insert(entity("members"), Vec::new());
        let batch = PushBatch::new(grouped);
        assert!(batch.is_empty());
        assert!(batch.request().is_empty());
    }

    #[test]
    fn all_accepted() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1"}))),
            entry(2, "members", "m-2", Some(json!({"id": "m-2"}))),
        ]);
        let outcome = batch.resolve(&response(
            vec![
                accepted("members", "m-1", Some("created")),
                accepted("members", "m-2", Some("updated")),
            ],
            vec![],
        ));

        assert_eq!(outcome.acknowledged, ids(&[1, 2]));
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.removable(), ids(&[1, 2]));
    }

    #[test]
    fn unlisted_entries_stay_unresolved() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1"}))),
            entry(2, "members", "m-2", Some(json!({"id": "m-2"}))),
        ]);
        let outcome = batch.resolve(&response(vec![accepted("members", "m-2", None)], vec![]));

        assert_eq!(outcome.acknowledged, ids(&[2]));
        assert_eq!(outcome.unresolved, ids(&[1]));
        assert_eq!(outcome.removable(), ids(&[2]));
    }

    #[test]
    fn bare_ack_claims_first_occurrence_only() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1"}))),
            entry(2, "members", "m-1", None),
        ]);
        let outcome = batch.resolve(&response(
            vec![AcceptedChange::Id(RecordId::new("m-1"))],
            vec![],
        ));

        assert_eq!(outcome.acknowledged, ids(&[1]));
        assert_eq!(outcome.unresolved, ids(&[2]));
    }

    #[test]
    fn update_then_delete_both_acknowledged() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1"}))),
            entry(2, "members", "m-1", None),
        ]);
        let outcome = batch.resolve(&response(
            vec![
                accepted("members", "m-1", Some("updated")),
                accepted("members", "m-1", Some("deleted")),
            ],
            vec![],
        ));

        assert_eq!(outcome.acknowledged, ids(&[1, 2]));
        assert!(outcome.superseded.is_empty());
    }

    #[test]
    fn accepted_delete_supersedes_rejected_update() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1", "belt": "purple?"}))),
            entry(2, "members", "m-1", None),
        ]);
        let outcome = batch.resolve(&response(
            vec![accepted("members", "m-1", Some("deleted"))],
            vec![rejected("members", "m-1", "invalid belt")],
        ));

        assert_eq!(outcome.acknowledged, ids(&[2]));
        assert_eq!(outcome.superseded, ids(&[1]));
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.removable(), ids(&[1, 2]));
    }

    #[test]
    fn superseding_ignores_other_records() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "m-1", Some(json!({"id": "m-1"}))),
            entry(2, "members", "m-2", Some(json!({"id": "m-2"}))),
            entry(3, "members", "m-1", None),
        ]);
        let outcome = batch.resolve(&response(
            vec![accepted("members", "m-1", Some("deleted"))],
            vec![],
        ));

        assert_eq!(outcome.acknowledged, ids(&[3]));
        assert_eq!(outcome.superseded, ids(&[1]));
        assert_eq!(outcome.unresolved, ids(&[2]));
    }

    #[test]
    fn action_kind_falls_back_to_any_occurrence() {
        let batch = PushBatch::from_entries(vec![entry(1, "members", "m-1", None)]);
        let outcome = batch.resolve(&response(
            vec![accepted("members", "m-1", Some("updated"))],
            vec![],
        ));
        assert_eq!(outcome.acknowledged, ids(&[1]));
    }

    #[test]
    fn acks_are_scoped_to_entity_type() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "members", "x-1", Some(json!({"id": "x-1"}))),
            entry(2, "payments", "x-1", Some(json!({"id": "x-1"}))),
        ]);
        let outcome = batch.resolve(&response(
            vec![accepted("payments", "x-1", Some("created"))],
            vec![],
        ));

        assert_eq!(outcome.acknowledged, ids(&[2]));
        assert_eq!(outcome.unresolved, ids(&[1]));
        assert!(outcome.superseded.is_empty());
    }

    #[test]
    fn rejections_carry_server_message() {
        let batch = PushBatch::from_entries(vec![
            entry(1, "payments", "p-1", Some(json!({"id": "p-1"}))),
            entry(2, "payments", "p-2", Some(json!({"id": "p-2"}))),
        ]);
        let outcome = batch.resolve(&response(
            vec![],
            vec![
                rejected("payments", "p-1", "amount must be positive"),
                rejected("payments", "p-2", ""),
                RejectedChange {
                    entity: None,
                    id: None,
                    error: "unknown".into(),
                },
            ],
        ));

        assert_eq!(
            outcome.rejected,
            vec![
                (QueueEntryId::new(1), "amount must be positive".to_string()),
                (QueueEntryId::new(2), DEFAULT_REJECTION.to_string()),
            ]
        );
        assert!(outcome.removable().is_empty());
    }

    #[test]
    fn retry_policy_bounds_attempts() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.decide(1), RetryDecision::Retry);
        assert_eq!(policy.decide(2), RetryDecision::Retry);
        assert_eq!(policy.decide(3), RetryDecision::DeadLetter);
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn retry_policy_clamps_zero() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.decide(1), RetryDecision::DeadLetter);
    }
}
