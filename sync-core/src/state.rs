//! Sync cycle state machine for novaclub sync.
//!
//! This module provides a pure, side-effect-free state machine for one
//! Push → Pull cycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (draining the queue, calling the server, writing the
//! local store) is performed by sync-client, not by this module. Only one
//! cycle can be in flight: a trigger arriving while the machine is busy is
//! coalesced into the running cycle.

use serde::{Deserialize, Serialize};

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The fixed-interval timer fired.
    Timer,
    /// Connectivity came back.
    Reconnect,
    /// The user asked for a sync.
    Explicit,
}

/// Classification of a failed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport-level failure; the client is effectively offline.
    Connectivity,
    /// The session token was refused.
    Unauthorized,
    /// The server answered with a structured error.
    Application,
    /// The local store failed.
    Storage,
}

impl FailureKind {
    /// Check if a push failing this way still lets the cycle pull.
    ///
    /// Pull does not depend on Push, so only an application-level rejection
    /// of the batch continues to the Pull phase.
    pub fn continues_to_pull(&self) -> bool {
        matches!(self, Self::Application)
    }
}

/// Coarse phase of the engine, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No cycle in flight.
    Idle,
    /// Submitting queued mutations.
    Pushing,
    /// Fetching and merging remote changes.
    Pulling,
}

/// Counts produced by a completed Push phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSummary {
    /// Entries submitted to the server.
    pub submitted: usize,
    /// Entries removed because the server accepted them.
    pub acknowledged: usize,
    /// Entries removed because a later write to the same record was accepted.
    pub superseded: usize,
    /// Entries the server explicitly rejected (still queued).
    pub rejected: usize,
    /// Entries moved to the dead-letter table.
    pub dead_lettered: usize,
    /// Entries neither accepted nor rejected (still queued).
    pub unresolved: usize,
}

/// Counts produced by a completed Pull phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSummary {
    /// Entity types whose batch was merged.
    pub entity_types: usize,
    /// Records written to the local store.
    pub applied: usize,
    /// Records skipped because a local write is still queued.
    pub skipped: usize,
    /// Watermarks that moved forward.
    pub watermarks_advanced: usize,
}

/// Cycle state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle in flight.
    Idle,
    /// Push phase in flight.
    Pushing {
        /// What started this cycle.
        trigger: Trigger,
    },
    /// Pull phase in flight.
    Pulling {
        /// What started this cycle.
        trigger: Trigger,
        /// Push outcome, `None` if the batch was rejected as a whole.
        pushed: Option<PushSummary>,
        /// Message of the rejected push, if any.
        push_error: Option<String>,
    },
}

impl CycleState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller (sync-client) is responsible for
    /// executing the returned actions and feeding their outcome back in.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (Self::Idle, Event::Triggered { trigger, online }) => {
                if online {
                    (Self::Pushing { trigger }, vec![Action::Push])
                } else {
                    (
                        Self::Idle,
                        vec![Action::Emit(SyncEvent::Skipped { trigger })],
                    )
                }
            }

            // Busy: coalesce
            (
                state @ (Self::Pushing { .. } | Self::Pulling { .. }),
                Event::Triggered { trigger, .. },
            ) => (state, vec![Action::Emit(SyncEvent::Coalesced { trigger })]),

            // From Pushing
            (Self::Pushing { trigger }, Event::PushSucceeded { summary }) => (
                Self::Pulling {
                    trigger,
                    pushed: Some(summary),
                    push_error: None,
                },
                vec![Action::Pull],
            ),
            (Self::Pushing { trigger }, Event::PushFailed { kind, error }) => {
                if kind.continues_to_pull() {
                    (
                        Self::Pulling {
                            trigger,
                            pushed: None,
                            push_error: Some(error),
                        },
                        vec![Action::Pull],
                    )
                } else {
                    (
                        Self::Idle,
                        vec![Action::Emit(SyncEvent::CycleFailed {
                            trigger,
                            phase: Phase::Pushing,
                            kind,
                            error,
                            pushed: None,
                        })],
                    )
                }
            }

            // From Pulling
            (
                Self::Pulling {
                    trigger,
                    pushed,
                    push_error,
                },
                Event::PullSucceeded { summary },
            ) => (
                Self::Idle,
                vec![Action::Emit(SyncEvent::CycleCompleted {
                    trigger,
                    pushed,
                    pulled: summary,
                    push_error,
                })],
            ),
            (Self::Pulling { trigger, pushed, .. }, Event::PullFailed { kind, error }) => (
                Self::Idle,
                vec![Action::Emit(SyncEvent::CycleFailed {
                    trigger,
                    phase: Phase::Pulling,
                    kind,
                    error,
                    pushed,
                })],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a cycle is in flight.
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Current coarse phase.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Pushing { .. } => Phase::Pushing,
            Self::Pulling { .. } => Phase::Pulling,
        }
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events fed into the cycle state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A trigger fired.
    Triggered {
        /// What fired.
        trigger: Trigger,
        /// Connectivity provider value at trigger time.
        online: bool,
    },
    /// The Push phase finished.
    PushSucceeded {
        /// Per-entry outcome counts.
        summary: PushSummary,
    },
    /// The Push phase failed as a whole.
    PushFailed {
        /// Failure classification.
        kind: FailureKind,
        /// Error message describing the failure.
        error: String,
    },
    /// The Pull phase finished.
    PullSucceeded {
        /// Merge counts.
        summary: PullSummary,
    },
    /// The Pull phase failed.
    PullFailed {
        /// Failure classification.
        kind: FailureKind,
        /// Error message describing the failure.
        error: String,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drain the queue and submit one batch.
    Push,
    /// Send watermarks and merge the response.
    Pull,
    /// Emit an event to the application.
    Emit(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A trigger fired while offline; no cycle ran.
    Skipped {
        /// What fired.
        trigger: Trigger,
    },
    /// A trigger fired while a cycle was in flight and was folded into it.
    Coalesced {
        /// What fired.
        trigger: Trigger,
    },
    /// The cycle reached the end of the Pull phase.
    CycleCompleted {
        /// What started the cycle.
        trigger: Trigger,
        /// Push counts, `None` if the batch was rejected as a whole.
        pushed: Option<PushSummary>,
        /// Pull counts.
        pulled: PullSummary,
        /// Message of the rejected push, if any.
        push_error: Option<String>,
    },
    /// The cycle stopped early.
    CycleFailed {
        /// What started the cycle.
        trigger: Trigger,
        /// Phase that failed.
        phase: Phase,
        /// Failure classification.
        kind: FailureKind,
        /// Error message describing the failure.
        error: String,
        /// Push counts if the Push phase had completed.
        pushed: Option<PushSummary>,
    },
}

impl SyncEvent {
    /// Check if this event ends a cycle that actually ran.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CycleCompleted { .. } | Self::CycleFailed { .. })
    }

    /// Failure classification, if this event reports a failure.
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            Self::CycleFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
