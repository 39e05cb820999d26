//! Sign in and out.

use anyhow::Result;
use novaclub_sync_client::SessionMode;

use crate::config::Paths;

/// Run the login command.
pub async fn login(paths: &Paths, email: &str, password: &str) -> Result<()> {
    let client = paths.open_client().await?;
    let session = client.login(email, password).await?;

    let name = match (&session.user.first_name, &session.user.last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.clone(),
        _ => session.user.email.clone(),
    };

    println!("Signed in as {}", name);
    println!();
    println!("  Email: {}", session.user.email);
    if let Some(club) = &session.user.club_id {
        println!("  Club:  {}", club);
    }
    if let Some(role) = &session.user.role {
        println!("  Role:  {}", role);
    }
    match session.mode {
        SessionMode::Online => println!("  Mode:  online"),
        SessionMode::Offline => {
            println!("  Mode:  offline (cached login)");
            println!();
            println!("Changes will sync when the service is reachable.");
        }
    }

    Ok(())
}

/// Run the logout command.
pub async fn logout(paths: &Paths) -> Result<()> {
    let client = paths.open_client().await?;
    client.logout().await?;
    println!("Signed out. The cached login has been removed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::offline_paths;
    use tempfile::tempdir;

    #[tokio::test]
    async fn offline_login_without_cache_fails() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;

        let err = login(&paths, "sensei@dojo.fr", "s3cret").await.unwrap_err();
        assert!(
            err.to_string().contains("invalid email or password"),
            "got: {}",
            err
        );
    }

    #[tokio::test]
    async fn logout_without_login_succeeds() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;
        assert!(logout(&paths).await.is_ok());
    }
}
