//! Show sync status and manage dead letters.

use anyhow::Result;
use novaclub_sync_client::ClientStatus;
use novaclub_sync_types::QueueEntryId;

use crate::commands::sync::describe;
use crate::config::Paths;

/// Run the status command.
pub async fn run(paths: &Paths, json: bool) -> Result<()> {
    let client = paths.open_client().await?;
    let status = client.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(paths, &status);
    }
    Ok(())
}

fn print_status(paths: &Paths, status: &ClientStatus) {
    println!("=== novaclub-sync status ===");
    println!();

    println!("Session:");
    match &status.user {
        Some(email) => {
            println!("  User:    {}", email);
            let session = if status.has_session {
                "active"
            } else {
                "expired (offline login only)"
            };
            println!("  Session: {}", session);
        }
        None => {
            println!("  NOT SIGNED IN");
            println!();
            println!("Run 'novaclub-sync login --email <email>' to sign in.");
        }
    }
    println!();

    println!("Connection:");
    println!(
        "  Status: {}",
        if status.offline { "OFFLINE" } else { "ONLINE" }
    );
    if let Some(at) = &status.last_completed_at {
        println!("  Last sync: {}", at);
    }
    if let Some(event) = &status.last_event {
        println!("  Last cycle: {}", describe(event));
    }
    println!();

    println!("Queue:");
    println!("  Pending:      {}", status.queued);
    for (entity, depth) in &status.queue_depth {
        println!("    {:<20} {}", entity.as_str(), depth);
    }
    println!("  Dead letters: {}", status.dead_letters);
    println!();

    println!("Watermarks:");
    if status.watermarks.is_empty() {
        println!("  (never pulled)");
    }
    for (entity, at) in &status.watermarks {
        println!("  {:<20} {}", entity.as_str(), at);
    }
    println!();
    println!("Data dir: {}", paths.data_dir.display());
}

/// Run the dead-letters command.
pub async fn dead_letters(paths: &Paths) -> Result<()> {
    let client = paths.open_client().await?;
    let letters = client.dead_letters().await?;

    if letters.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    println!("{} dead letter(s):", letters.len());
    println!();
    for letter in &letters {
        let action = if letter.entry.is_deletion() {
            "delete"
        } else {
            "write"
        };
        println!(
            "  [{}] {} {}/{} after {} attempt(s)",
            letter.entry.id,
            action,
            letter.entry.entity_type,
            letter.entry.record_id,
            letter.entry.attempts
        );
        println!("      {}", letter.reason);
    }
    println!();
    println!("Retry one with: novaclub-sync requeue <id>");
    Ok(())
}

/// Run the requeue command.
pub async fn requeue(paths: &Paths, entry_id: i64) -> Result<()> {
    let client = paths.open_client().await?;
    match client.requeue(QueueEntryId::new(entry_id)).await? {
        Some(id) => {
            println!("Requeued entry {}. It will be sent on the next sync.", id);
            Ok(())
        }
        None => anyhow::bail!("No dead letter with id {}", entry_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::offline_paths;
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_without_login() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;

        // Should succeed but show "not signed in"
        assert!(run(&paths, false).await.is_ok());
        assert!(run(&paths, true).await.is_ok());
    }

    #[tokio::test]
    async fn status_counts_queued_writes() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;
        crate::commands::records::put(&paths, "members", r#"{"first_name": "Aiko"}"#, None)
            .await
            .unwrap();

        let client = paths.open_client().await.unwrap();
        let status = client.status().await.unwrap();
        assert_eq!(status.queued, 1);
        assert!(status.offline);
        drop(client);

        assert!(run(&paths, false).await.is_ok());
    }

    #[tokio::test]
    async fn dead_letters_empty_and_requeue_unknown() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;

        assert!(dead_letters(&paths).await.is_ok());
        let err = requeue(&paths, 42).await.unwrap_err();
        assert!(err.to_string().contains("No dead letter"), "got: {}", err);
    }
}
