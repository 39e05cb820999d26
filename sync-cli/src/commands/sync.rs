//! Run sync cycles.

use anyhow::{Context, Result};
use novaclub_sync_core::{FailureKind, SyncEvent};

use crate::config::Paths;

/// Describe a cycle outcome on one line.
pub fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Skipped { .. } => "Offline: nothing was sent. Changes stay queued.".to_string(),
        SyncEvent::Coalesced { .. } => "A sync cycle is already running.".to_string(),
        SyncEvent::CycleCompleted {
            pushed,
            pulled,
            push_error,
            ..
        } => {
            let pushed = pushed.unwrap_or_default();
            let mut line = format!(
                "Sync complete: pushed {}/{}, pulled {} ({} kept local)",
                pushed.acknowledged + pushed.superseded,
                pushed.submitted,
                pulled.applied,
                pulled.skipped
            );
            if pushed.rejected > 0 {
                line.push_str(&format!(", {} rejected", pushed.rejected));
            }
            if pushed.dead_lettered > 0 {
                line.push_str(&format!(", {} dead-lettered", pushed.dead_lettered));
            }
            if let Some(error) = push_error {
                line.push_str(&format!(". Push failed: {}", error));
            }
            line
        }
        SyncEvent::CycleFailed {
            phase, kind, error, ..
        } => format!("Sync failed during {:?} ({:?}): {}", phase, kind, error),
    }
}

/// Run the sync command.
pub async fn once(paths: &Paths) -> Result<()> {
    let client = paths.open_client().await?;
    let report = client.sync_now().await;

    println!("{}", describe(&report.event));
    if report.event.failure() == Some(FailureKind::Unauthorized) {
        println!();
        println!("Session expired. Run 'novaclub-sync login --email <email>'.");
    }
    Ok(())
}

/// Run the background loop until Ctrl-C.
pub async fn run(paths: &Paths) -> Result<()> {
    let client = paths.open_client().await?;
    let config = paths.load_config()?;
    let mut events = client.events();
    let handle = client.start_background();

    println!(
        "Syncing every {}s against {}. Press Ctrl-C to stop.",
        config.sync.interval_secs, config.remote.base_url
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) if event.is_terminal() => println!("{}", describe(&event)),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} sync events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    println!("Stopping...");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::offline_paths;
    use novaclub_sync_core::{Phase, PullSummary, PushSummary, Trigger};
    use tempfile::tempdir;

    #[test]
    fn describes_outcomes() {
        let skipped = SyncEvent::Skipped {
            trigger: Trigger::Explicit,
        };
        assert!(describe(&skipped).starts_with("Offline"));

        let completed = SyncEvent::CycleCompleted {
            trigger: Trigger::Explicit,
            pushed: Some(PushSummary {
                submitted: 3,
                acknowledged: 2,
                rejected: 1,
                ..Default::default()
            }),
            pulled: PullSummary {
                applied: 4,
                ..Default::default()
            },
            push_error: None,
        };
        assert_eq!(
            describe(&completed),
            "Sync complete: pushed 2/3, pulled 4 (0 kept local), 1 rejected"
        );

        let failed = SyncEvent::CycleFailed {
            trigger: Trigger::Timer,
            phase: Phase::Pushing,
            kind: FailureKind::Connectivity,
            error: "connection refused".into(),
            pushed: None,
        };
        assert!(describe(&failed).contains("connection refused"));
    }

    #[tokio::test]
    async fn sync_while_offline_succeeds() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;
        assert!(once(&paths).await.is_ok());
    }
}
