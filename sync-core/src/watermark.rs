//! Watermark tracking for novaclub sync.
//!
//! A watermark is the server timestamp of the newest fully merged Pull
//! response for one entity type. Watermarks only ever move forward: a
//! server timestamp older than (or equal to) the current one is ignored.
//! An entity type with no watermark is pulled from the beginning.

use std::collections::BTreeMap;

use novaclub_sync_types::{EntityType, PullRequest, Timestamp};

/// Tracks one watermark per entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatermarkTracker {
    marks: BTreeMap<EntityType, Timestamp>,
}

impl WatermarkTracker {
    /// Create an empty tracker (every entity type at first sync).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker from persisted watermarks.
    pub fn from_marks(marks: impl IntoIterator<Item = (EntityType, Timestamp)>) -> Self {
        let mut tracker = Self::new();
        for (entity, ts) in marks {
            tracker.advance(&entity, ts);
        }
        tracker
    }

    /// Current watermark for an entity type.
    pub fn get(&self, entity: &EntityType) -> Option<Timestamp> {
        self.marks.get(entity).copied()
    }

    /// Move the watermark forward.
    ///
    /// Returns `true` if the watermark changed.
    pub fn advance(&mut self, entity: &EntityType, ts: Timestamp) -> bool {
        match next_watermark(self.get(entity), ts) {
            Some(next) => {
                self.marks.insert(entity.clone(), next);
                true
            }
            None => false,
        }
    }

    /// Build the pull request body for the given entity types.
    ///
    /// Entity types without a watermark are sent as `null`.
    pub fn pull_request(&self, entities: &[EntityType]) -> PullRequest {
        let watermarks = entities
            .iter()
            .map(|entity| (entity.clone(), self.get(entity)))
            .collect();
        PullRequest { watermarks }
    }

    /// Iterate over all known watermarks.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityType, &Timestamp)> {
        self.marks.iter()
    }

    /// Number of entity types with a watermark.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Check if no watermark is known yet.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// The watermark to store after merging a batch stamped `candidate`.
///
/// `None` means the stored value must stay as it is.
pub fn next_watermark(current: Option<Timestamp>, candidate: Timestamp) -> Option<Timestamp> {
    match current {
        Some(existing) if existing >= candidate => None,
        _ => Some(candidate),
    }
}
