//! Configuration management for novaclub-sync.

use anyhow::{Context, Result};
use novaclub_sync_client::{ClientConfig, DefaultClient, OfflineClient};
use std::path::{Path, PathBuf};

/// Default configuration file name inside the data directory.
pub const CONFIG_FILE: &str = "novaclub.toml";

/// Where the CLI keeps its state.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data directory (local store, default config location).
    pub data_dir: PathBuf,
    /// Configuration file.
    pub config_file: PathBuf,
}

impl Paths {
    /// Resolve paths; the config file defaults to the data directory.
    pub fn new(data_dir: PathBuf, config_file: Option<PathBuf>) -> Self {
        let config_file = config_file.unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        Self {
            data_dir,
            config_file,
        }
    }

    /// Check if a configuration file exists.
    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    /// Load the configuration, or the defaults if none was written.
    pub fn load_config(&self) -> Result<ClientConfig> {
        if !self.is_initialized() {
            tracing::debug!(
                "No config at {}, using defaults",
                self.config_file.display()
            );
            return Ok(ClientConfig::default());
        }
        ClientConfig::from_file(&self.config_file).context("Invalid configuration")
    }

    /// Write the configuration file (owner read/write only).
    pub async fn save_config(&self, config: &ClientConfig) -> Result<()> {
        let contents = config.to_toml()?;
        if let Some(parent) = self.config_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }
        tokio::fs::write(&self.config_file, contents)
            .await
            .context("Failed to save configuration")?;
        set_file_permissions_0600(&self.config_file).await?;
        Ok(())
    }

    /// Open the client described by the configuration.
    pub async fn open_client(&self) -> Result<DefaultClient> {
        let config = self.load_config()?;
        OfflineClient::open(&config, &self.data_dir)
            .await
            .context("Failed to open local store")
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Test helpers shared by the command modules.
#[cfg(test)]
pub mod testing {
    use super::*;

    /// Paths in `dir` with a config that points at a closed port,
    /// so every command runs offline.
    pub async fn offline_paths(dir: &Path) -> Paths {
        let paths = Paths::new(dir.to_path_buf(), None);
        let mut config = ClientConfig::default();
        config.remote.base_url = "http://127.0.0.1:9/api/v1".into();
        config.remote.timeout_secs = 2;
        paths.save_config(&config).await.unwrap();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_file_defaults_to_data_dir() {
        let paths = Paths::new(PathBuf::from("/var/lib/novaclub"), None);
        assert_eq!(
            paths.config_file,
            PathBuf::from("/var/lib/novaclub/novaclub.toml")
        );

        let paths = Paths::new(
            PathBuf::from("/var/lib/novaclub"),
            Some(PathBuf::from("/etc/novaclub.toml")),
        );
        assert_eq!(paths.config_file, PathBuf::from("/etc/novaclub.toml"));
    }

    #[tokio::test]
    async fn missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path().to_path_buf(), None);
        assert!(!paths.is_initialized());
        assert_eq!(paths.load_config().unwrap(), ClientConfig::default());
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let paths = testing::offline_paths(dir.path()).await;

        let loaded = paths.load_config().unwrap();
        assert_eq!(loaded.remote.base_url, "http://127.0.0.1:9/api/v1");
        assert_eq!(loaded.remote.timeout_secs, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let paths = testing::offline_paths(dir.path()).await;

        let perms = tokio::fs::metadata(&paths.config_file)
            .await
            .unwrap()
            .permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn data_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("test-data");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        set_dir_permissions_0700(&data_dir).await.unwrap();

        let perms = tokio::fs::metadata(&data_dir).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o700, "dir should be 0700");
    }
}
