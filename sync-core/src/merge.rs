//! Pull merge planning.
//!
//! Records pulled from the server are written to the local store with
//! remote-origin semantics (no queue entry). A record that still has a
//! queued local mutation is left alone: the optimistic local write stays
//! visible until the server has acknowledged it, after which a later pull
//! brings the merged state back.

use std::collections::{BTreeMap, BTreeSet};

use novaclub_sync_types::{Record, RecordId};

/// Which pulled records to write and which to skip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Records to upsert, at most one per id (the last one received).
    pub apply: Vec<Record>,
    /// Ids skipped because a local mutation is still queued.
    pub skipped: Vec<RecordId>,
}

impl MergePlan {
    /// Plan the merge of one entity type's pulled records.
    pub fn build(records: Vec<Record>, pending: &BTreeSet<RecordId>) -> Self {
        let mut latest: BTreeMap<RecordId, Record> = BTreeMap::new();
        let mut order: Vec<RecordId> = Vec::new();
        for record in records {
            if !latest.contains_key(&record.id) {
                order.push(record.id.clone());
            }
            latest.insert(record.id.clone(), record);
        }

        let mut plan = Self::default();
        for id in order {
            if pending.contains(&id) {
                plan.skipped.push(id);
            } else if let Some(record) = latest.remove(&id) {
                plan.apply.push(record);
            }
        }
        plan
    }

    /// Check if nothing is to be written.
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty()
    }
}
