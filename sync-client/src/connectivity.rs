//! Connectivity providers.
//!
//! A provider tells the sync engine whether the device believes it is
//! online. [`ConnectivitySignal`] is fed by the embedding application
//! (push-based); [`ProbeConnectivity`] polls the service health endpoint
//! and feeds a signal itself (poll-based). Either way the value is
//! necessary but not sufficient: a cycle can still fail with a
//! connectivity error while the provider says online.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::gateway::Gateway;
use crate::remote::RemoteApi;

/// Source of the online/offline signal.
pub trait ConnectivityProvider: Send + Sync {
    /// Current value.
    fn is_online(&self) -> bool;

    /// Receiver that observes every change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Push-based connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    /// Create a signal with an initial value.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Set the value; returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProvider for ConnectivitySignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Poll-based provider: probes the health endpoint on an interval.
///
/// The probe task stops when this value is dropped.
pub struct ProbeConnectivity {
    signal: ConnectivitySignal,
    task: JoinHandle<()>,
}

impl ProbeConnectivity {
    /// Spawn the probe task.
    ///
    /// The first probe runs immediately.
    pub fn spawn<G>(
        api: RemoteApi<G>,
        signal: ConnectivitySignal,
        path: String,
        interval: Duration,
    ) -> Self
    where
        G: Gateway + 'static,
    {
        let task_signal = signal.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let reachable = api.probe(&path).await;
                if task_signal.set_online(reachable) {
                    if reachable {
                        tracing::info!("Service reachable at {}", path);
                    } else {
                        tracing::warn!("Service unreachable at {}, working offline", path);
                    }
                }
            }
        });

        Self { signal, task }
    }

    /// The signal fed by the probe.
    pub fn signal(&self) -> &ConnectivitySignal {
        &self.signal
    }

    /// Stop probing.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ProbeConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConnectivityProvider for ProbeConnectivity {
    fn is_online(&self) -> bool {
        self.signal.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::MockGateway;
    use serde_json::json;

    #[test]
    fn signal_reports_changes_only() {
        let signal = ConnectivitySignal::new(false);
        assert!(!signal.is_online());

        assert!(signal.set_online(true));
        assert!(!signal.set_online(true));
        assert!(signal.is_online());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let signal = ConnectivitySignal::new(true);
        let mut rx = signal.subscribe();

        signal.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());

        let clone = signal.clone();
        clone.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn probe_feeds_signal() {
        let gateway = MockGateway::new();
        gateway.fail_next("/health", GatewayError::Connectivity("refused".into()));
        gateway.respond("/health", json!({"status": "ok"}));

        let signal = ConnectivitySignal::new(true);
        let mut rx = signal.subscribe();
        let probe = ProbeConnectivity::spawn(
            RemoteApi::new(Arc::new(gateway.clone())),
            signal,
            "/health".into(),
            Duration::from_millis(10),
        );

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!*rx.borrow_and_update());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow_and_update());
        assert!(probe.is_online());

        probe.stop();
        assert!(gateway.requests_to("/health").len() >= 2);
    }
}
