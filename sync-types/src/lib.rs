//! # sync-types
//!
//! Wire format and data model types for novaclub offline-first sync.
//!
//! This crate provides the foundational types used across all sync crates:
//! - [`EntityType`], [`RecordId`], [`TenantId`], [`QueueEntryId`], [`Timestamp`] - Identity and ordering types
//! - [`Record`], [`QueueEntry`], [`DeadLetter`] - Data model
//! - [`PushRequest`], [`PullRequest`] and friends - Remote protocol bodies
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod record;

pub use error::SyncError;
pub use ids::{EntityType, QueueEntryId, RecordId, TenantId, Timestamp};
pub use messages::{
    AcceptedChange, ErrorBody, LoginRequest, PullRequest, PullResponse, PulledRecord,
    PushChange, PushRequest, PushResponse, PushResults, RejectedChange, TokenResponse,
    UserProfile,
};
pub use record::{DeadLetter, QueueEntry, Record};
