//! Sync engine: runs Push → Pull cycles.
//!
//! The engine owns the [`CycleState`] machine from sync-core and executes
//! the actions it produces. Cycles are started by the interval timer, by
//! connectivity coming back, or explicitly. At most one cycle is in
//! flight; a trigger that arrives meanwhile is coalesced.
//!
//! Failures never escape a cycle: [`SyncEngine::run_cycle`] returns a
//! [`CycleReport`], and every outcome is broadcast as a [`SyncEvent`].

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use novaclub_sync_core::{
    Action, CycleState, Event, FailureKind, Phase, PullSummary, PushSummary, RetryPolicy,
    SyncEvent, Trigger, WatermarkTracker,
};
use novaclub_sync_types::{EntityType, Timestamp};

use crate::connectivity::ConnectivityProvider;
use crate::error::ClientError;
use crate::gateway::Gateway;
use crate::queue::MutationQueue;
use crate::remote::RemoteApi;
use crate::storage::{LocalStore, RejectionOutcome};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Snapshot of the engine published on a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: Phase,
    /// Connectivity provider value.
    pub online: bool,
    /// Whether the service answered during the last cycle, `None` before any cycle.
    pub reachable: Option<bool>,
    /// Last skipped, completed or failed cycle.
    pub last_event: Option<SyncEvent>,
    /// When the last cycle completed.
    pub last_completed_at: Option<Timestamp>,
}

impl SyncStatus {
    /// Check if the offline indicator should be shown.
    pub fn is_offline(&self) -> bool {
        !self.online || self.reachable == Some(false)
    }
}

/// Outcome of one call to [`SyncEngine::run_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// What started the cycle.
    pub trigger: Trigger,
    /// How it ended (`Skipped` or `Coalesced` if no cycle ran).
    pub event: SyncEvent,
    /// Wall time spent.
    pub duration: Duration,
}

impl CycleReport {
    /// Check if the cycle ran to the end of the Pull phase.
    pub fn is_completed(&self) -> bool {
        matches!(self.event, SyncEvent::CycleCompleted { .. })
    }
}

/// Sync engine.
///
/// Cheap to clone; clones share the same state machine.
pub struct SyncEngine<S, G, C> {
    inner: Arc<EngineInner<S, G, C>>,
}

struct EngineInner<S, G, C> {
    store: Arc<S>,
    queue: MutationQueue<S>,
    api: RemoteApi<G>,
    connectivity: Arc<C>,
    entity_types: Vec<EntityType>,
    state: Mutex<CycleState>,
    events: broadcast::Sender<SyncEvent>,
    status: watch::Sender<SyncStatus>,
}

impl<S, G, C> Clone for SyncEngine<S, G, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Resets the state machine if a cycle future is dropped mid-flight.
struct CycleGuard<'a> {
    state: &'a Mutex<CycleState>,
    status: &'a watch::Sender<SyncStatus>,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CycleState::Idle;
            self.status.send_modify(|s| s.phase = Phase::Idle);
            tracing::warn!("Sync cycle cancelled before completion");
        }
    }
}

impl<S, G, C> SyncEngine<S, G, C>
where
    S: LocalStore + 'static,
    G: Gateway + 'static,
    C: ConnectivityProvider + 'static,
{
    /// Create an engine that pulls `entity_types` on every cycle.
    pub fn new(
        store: Arc<S>,
        api: RemoteApi<G>,
        connectivity: Arc<C>,
        entity_types: Vec<EntityType>,
        policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(SyncStatus {
            phase: Phase::Idle,
            online: connectivity.is_online(),
            reachable: None,
            last_event: None,
            last_completed_at: None,
        });

        Self {
            inner: Arc::new(EngineInner {
                queue: MutationQueue::new(Arc::clone(&store), policy),
                store,
                api,
                connectivity,
                entity_types,
                state: Mutex::new(CycleState::new()),
                events,
                status,
            }),
        }
    }

    /// The mutation queue.
    pub fn queue(&self) -> &MutationQueue<S> {
        &self.inner.queue
    }

    /// Subscribe to cycle events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Run one cycle to completion.
    ///
    /// Returns immediately with `Skipped` while offline, or `Coalesced`
    /// if another cycle is in flight.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let started = Instant::now();
        let online = self.inner.connectivity.is_online();
        self.inner.status.send_if_modified(|s| {
            let changed = s.online != online;
            s.online = online;
            changed
        });

        let first = self.transition(Event::Triggered { trigger, online });
        let mut guard = CycleGuard {
            state: &self.inner.state,
            status: &self.inner.status,
            armed: first.contains(&Action::Push),
        };

        let mut pending: VecDeque<Action> = first.into();
        let mut outcome = None;
        while let Some(action) = pending.pop_front() {
            let next = match action {
                Action::Push => {
                    let event = self.push_phase().await;
                    self.transition(event)
                }
                Action::Pull => {
                    let event = self.pull_phase().await;
                    self.transition(event)
                }
                Action::Emit(event) => {
                    self.emit(&event);
                    outcome = Some(event);
                    Vec::new()
                }
            };
            pending.extend(next);
        }
        guard.armed = false;

        CycleReport {
            trigger,
            event: outcome.unwrap_or(SyncEvent::Coalesced { trigger }),
            duration: started.elapsed(),
        }
    }

    fn transition(&self, event: Event) -> Vec<Action> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (next, actions) = std::mem::take(&mut *state).on_event(event);
        let phase = next.phase();
        *state = next;
        drop(state);

        self.inner.status.send_if_modified(|s| {
            let changed = s.phase != phase;
            s.phase = phase;
            changed
        });
        actions
    }

    fn emit(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Skipped { trigger } => {
                tracing::debug!("Sync skipped ({:?}): offline", trigger);
            }
            SyncEvent::Coalesced { trigger } => {
                tracing::debug!("Sync trigger coalesced ({:?}): cycle in flight", trigger);
            }
            SyncEvent::CycleCompleted {
                trigger,
                pushed,
                pulled,
                push_error,
            } => {
                let pushed = pushed.unwrap_or_default();
                tracing::info!(
                    "Sync cycle completed ({:?}): pushed {}/{}, pulled {} ({} skipped)",
                    trigger,
                    pushed.acknowledged + pushed.superseded,
                    pushed.submitted,
                    pulled.applied,
                    pulled.skipped
                );
                if let Some(error) = push_error {
                    tracing::warn!("Push batch rejected: {}", error);
                }
            }
            SyncEvent::CycleFailed {
                trigger,
                phase,
                kind,
                error,
                ..
            } => match kind {
                FailureKind::Connectivity => {
                    tracing::info!(
                        "Sync cycle ({:?}) offline during {:?}: {}",
                        trigger,
                        phase,
                        error
                    );
                }
                FailureKind::Unauthorized => {
                    tracing::warn!("Sync cycle ({:?}) unauthorized: sign in again", trigger);
                }
                FailureKind::Application => {
                    tracing::warn!(
                        "Sync cycle ({:?}) failed during {:?}: {}",
                        trigger,
                        phase,
                        error
                    );
                }
                FailureKind::Storage => {
                    tracing::error!("Sync cycle ({:?}) storage failure: {}", trigger, error);
                }
            },
        }

        // No subscribers is fine.
        let _ = self.inner.events.send(event.clone());

        if matches!(event, SyncEvent::Coalesced { .. }) {
            return;
        }
        self.inner.status.send_modify(|s| {
            match event {
                SyncEvent::CycleCompleted { .. } => {
                    s.reachable = Some(true);
                    s.last_completed_at = Some(Timestamp::now());
                }
                SyncEvent::CycleFailed { kind, .. } => match kind {
                    FailureKind::Connectivity => s.reachable = Some(false),
                    FailureKind::Unauthorized | FailureKind::Application => {
                        s.reachable = Some(true)
                    }
                    FailureKind::Storage => {}
                },
                _ => {}
            }
            s.last_event = Some(event.clone());
        });
    }

    async fn push_phase(&self) -> Event {
        match self.push().await {
            Ok(summary) => Event::PushSucceeded { summary },
            Err(e) => {
                self.on_failure(&e).await;
                Event::PushFailed {
                    kind: e.kind(),
                    error: e.to_string(),
                }
            }
        }
    }

    async fn pull_phase(&self) -> Event {
        match self.pull().await {
            Ok(summary) => Event::PullSucceeded { summary },
            Err(e) => {
                self.on_failure(&e).await;
                Event::PullFailed {
                    kind: e.kind(),
                    error: e.to_string(),
                }
            }
        }
    }

    async fn on_failure(&self, error: &ClientError) {
        if error.kind() == FailureKind::Unauthorized {
            if let Err(e) = self.inner.store.set_session_token(None).await {
                tracing::error!("Failed to clear session token: {}", e);
            }
        }
    }

    async fn push(&self) -> Result<PushSummary, ClientError> {
        let batch = self.inner.queue.batch().await?;
        if batch.is_empty() {
            return Ok(PushSummary::default());
        }

        tracing::debug!("Pushing {} queued changes", batch.len());
        let response = self.inner.api.push(&batch.request()).await?;
        let outcome = batch.resolve(&response);

        self.inner.queue.acknowledge(&outcome.removable()).await?;

        let mut summary = PushSummary {
            submitted: batch.len(),
            acknowledged: outcome.acknowledged.len(),
            superseded: outcome.superseded.len(),
            rejected: outcome.rejected.len(),
            dead_lettered: 0,
            unresolved: outcome.unresolved.len(),
        };
        for (id, reason) in &outcome.rejected {
            if self.inner.queue.reject(*id, reason).await? == RejectionOutcome::DeadLettered {
                summary.dead_lettered += 1;
            }
        }
        if summary.unresolved > 0 {
            tracing::debug!("{} changes not acknowledged, kept for next cycle", summary.unresolved);
        }

        Ok(summary)
    }

    async fn pull(&self) -> Result<PullSummary, ClientError> {
        let tracker = WatermarkTracker::from_marks(self.inner.store.watermarks().await?);
        let request = tracker.pull_request(&self.inner.entity_types);
        let response = self.inner.api.pull(&request).await?;

        let mut summary = PullSummary::default();
        let watermark = response.sync_timestamp;
        for (entity, pulled) in response.changes {
            let records = pulled.into_iter().map(|p| p.data).collect();
            let merged = self
                .inner
                .store
                .apply_remote_batch(&entity, records, watermark)
                .await?;

            summary.entity_types += 1;
            summary.applied += merged.applied;
            summary.skipped += merged.skipped;
            if merged.watermark_advanced {
                summary.watermarks_advanced += 1;
            }
        }

        Ok(summary)
    }

    /// Spawn the background loop.
    ///
    /// The first timer tick fires immediately. The timer is reset after
    /// every cycle, and connectivity changes seen during a cycle are
    /// folded into it.
    pub fn spawn(&self, interval: Duration) -> SyncHandle<S, G, C> {
        let shutdown = Arc::new(Notify::new());
        let engine = self.clone();
        let task_shutdown = Arc::clone(&shutdown);
        let task = tokio::spawn(async move { engine.run_loop(interval, task_shutdown).await });

        SyncHandle {
            engine: self.clone(),
            shutdown,
            task,
        }
    }

    async fn run_loop(self, interval: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online_rx = self.inner.connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();
        let mut watching = true;

        tracing::info!("Sync loop started (every {:?})", interval);

        loop {
            let trigger = tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => Trigger::Timer,
                changed = online_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let online = *online_rx.borrow_and_update();
                    self.inner.status.send_modify(|s| s.online = online);
                    let reconnected = online && !was_online;
                    was_online = online;
                    if !reconnected {
                        tracing::info!("Connectivity lost, working offline");
                        continue;
                    }
                    tracing::info!("Connectivity restored, syncing");
                    Trigger::Reconnect
                }
            };

            self.run_cycle(trigger).await;

            if watching {
                was_online = *online_rx.borrow_and_update();
            }
            ticker.reset();
        }

        tracing::info!("Sync loop stopped");
    }
}

/// Handle to a running background loop.
pub struct SyncHandle<S, G, C> {
    engine: SyncEngine<S, G, C>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<S, G, C> SyncHandle<S, G, C>
where
    S: LocalStore + 'static,
    G: Gateway + 'static,
    C: ConnectivityProvider + 'static,
{
    /// Run an explicit cycle on the caller's task.
    pub async fn sync_now(&self) -> CycleReport {
        self.engine.run_cycle(Trigger::Explicit).await
    }

    /// Subscribe to cycle events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.events()
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Stop the loop after the cycle in flight, if any, and wait for it.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!("Sync loop ended abnormally: {}", e);
        }
    }
}
