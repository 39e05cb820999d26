//! # sync-core
//!
//! Pure logic for novaclub sync (no I/O, instant tests).
//!
//! This crate implements the cycle state machine and the batch, watermark
//! and merge algorithms without any network or disk I/O, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (HTTP, SQLite) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod merge;
pub mod state;
pub mod watermark;

pub use batch::{BatchOutcome, PushBatch, RetryDecision, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use merge::MergePlan;
pub use state::{
    Action, CycleState, Event, FailureKind, Phase, PullSummary, PushSummary, SyncEvent, Trigger,
};
pub use watermark::{next_watermark, WatermarkTracker};
