//! Write a default configuration.

use anyhow::Result;
use novaclub_sync_client::ClientConfig;

use crate::config::Paths;

/// Run the init command.
pub async fn run(paths: &Paths, base_url: Option<&str>, force: bool) -> Result<()> {
    if paths.is_initialized() && !force {
        anyhow::bail!(
            "Already initialized. Use --force to overwrite {}.",
            paths.config_file.display()
        );
    }

    let mut config = ClientConfig::default();
    if let Some(url) = base_url {
        config.remote.base_url = url.trim_end_matches('/').to_string();
    }
    paths.save_config(&config).await?;

    println!("Configuration written!");
    println!();
    println!("  Config:   {}", paths.config_file.display());
    println!("  Service:  {}", config.remote.base_url);
    println!(
        "  Database: {}",
        config.storage.resolve(&paths.data_dir).display()
    );
    println!();
    println!("Next steps:");
    println!("  1. Sign in: novaclub-sync login --email <email>");
    println!("  2. Sync:    novaclub-sync sync");

    Ok(())
}
