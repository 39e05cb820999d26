//! Authentication with offline fallback.
//!
//! A successful online login caches the user's profile together with a
//! salted Argon2id hash of the password. While the service is out of
//! reach, the same email and password unlock a local-only session by
//! verifying against that hash.
//!
//! # Security Notes
//!
//! - The plaintext password is never stored; it is zeroed after hashing
//! - Argon2id parameters scale with available RAM and are embedded in the
//!   PHC string, so verification works with whatever parameters hashed it
//! - Every offline failure is the same [`AuthError::InvalidCredentials`],
//!   whether or not a cached login exists

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use novaclub_sync_types::{Timestamp, UserProfile};

use crate::connectivity::ConnectivityProvider;
use crate::error::{AuthError, GatewayError};
use crate::gateway::Gateway;
use crate::remote::RemoteApi;
use crate::storage::{CachedCredential, LocalStore};

/// Salt length in bytes (128 bits).
const SALT_LEN: usize = 16;

/// Argon2id parameters for device-adaptive password hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_mib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Create parameters based on available RAM in MB.
    ///
    /// Scaling:
    /// - < 2000 MB: 12 MiB, 3 iterations (low-end tablet)
    /// - < 4000 MB: 19 MiB, 2 iterations
    /// - < 8000 MB: 46 MiB, 1 iteration
    /// - >= 8000 MB: 64 MiB, 3 iterations (desktop)
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = match ram_mb {
            0..=1999 => (12, 3, 1),
            2000..=3999 => (19, 2, 1),
            4000..=7999 => (46, 1, 1),
            _ => (64, 3, 4),
        };
        Self {
            memory_mib,
            iterations,
            parallelism,
        }
    }

    /// Get memory in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Get lane count.
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    fn to_argon2_params(self) -> Result<Params, AuthError> {
        Params::new(
            self.memory_mib * 1024, // MiB to KiB
            self.iterations,
            self.parallelism,
            None,
        )
        .map_err(|e| AuthError::Hashing(e.to_string()))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::for_ram_mb(detect_available_ram_mb())
    }
}

/// Detect total RAM in megabytes.
pub fn detect_available_ram_mb() -> u64 {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() / (1024 * 1024)
}

fn hash_blocking(password: &str, params: Argon2Params) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| AuthError::Hashing(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| AuthError::Hashing(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Hash a password into an Argon2id PHC string, off the async runtime.
pub async fn hash_password(password: &str, params: Argon2Params) -> Result<String, AuthError> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || hash_blocking(&password, params))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// Verify a password against a PHC string.
///
/// A malformed hash never verifies.
pub async fn verify_password(password: &str, phc: &str) -> bool {
    let password = Zeroizing::new(password.to_string());
    let phc = phc.to_string();
    tokio::task::spawn_blocking(move || match PasswordHash::new(&phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .unwrap_or(false)
}

/// How a session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// The service issued a token.
    Online,
    /// Unlocked from the cached credential; no token was issued.
    Offline,
}

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Profile of the signed-in user.
    pub user: UserProfile,
    /// How the session was established.
    pub mode: SessionMode,
}

/// Online login with offline fallback.
pub struct Authenticator<S, G, C> {
    store: Arc<S>,
    api: RemoteApi<G>,
    connectivity: Arc<C>,
    params: Argon2Params,
    dummy_hash: OnceCell<String>,
}

impl<S, G, C> Authenticator<S, G, C>
where
    S: LocalStore,
    G: Gateway,
    C: ConnectivityProvider,
{
    /// Create an authenticator with device-adaptive hashing parameters.
    pub fn new(store: Arc<S>, api: RemoteApi<G>, connectivity: Arc<C>) -> Self {
        Self::with_params(store, api, connectivity, Argon2Params::default())
    }

    /// Create an authenticator with explicit hashing parameters.
    pub fn with_params(
        store: Arc<S>,
        api: RemoteApi<G>,
        connectivity: Arc<C>,
        params: Argon2Params,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            params,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Sign in.
    ///
    /// Online when the provider says so; falls back to the cached
    /// credential if the service cannot be reached.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        if self.connectivity.is_online() {
            match self.login_online(email, password).await {
                Err(AuthError::Gateway(e)) if e.is_connectivity() => {
                    tracing::info!("Service unreachable ({}), trying offline login", e);
                }
                other => return other,
            }
        }
        self.login_offline(email, password).await
    }

    async fn login_online(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let token = match self.api.login(email, password).await {
            Ok(token) => token,
            Err(GatewayError::Unauthorized) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        let gateway = self.api.gateway();
        gateway.set_token(Some(token.access_token.clone()));
        let user = match self.api.whoami().await {
            Ok(user) => user,
            Err(e) => {
                gateway.set_token(None);
                return Err(e.into());
            }
        };

        let password_hash = hash_password(password, self.params).await?;
        self.store
            .save_credential(&CachedCredential {
                email: email.to_string(),
                password_hash,
                user: user.clone(),
                token: Some(token.access_token),
                cached_at: Timestamp::now(),
            })
            .await?;

        tracing::info!("Signed in online as user {}", user.id);
        Ok(Session {
            user,
            mode: SessionMode::Online,
        })
    }

    async fn login_offline(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let cached = self
            .store
            .cached_credential()
            .await?
            .filter(|c| c.email == email);

        let Some(cached) = cached else {
            // Same work as a real verification.
            if let Ok(dummy) = self
                .dummy_hash
                .get_or_try_init(|| hash_password("novaclub-offline-login", self.params))
                .await
            {
                verify_password(password, dummy).await;
            }
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &cached.password_hash).await {
            return Err(AuthError::InvalidCredentials);
        }

        if cached.token.is_some() {
            self.api.gateway().set_token(cached.token.clone());
        }
        tracing::info!("Signed in offline as user {}", cached.user.id);
        Ok(Session {
            user: cached.user,
            mode: SessionMode::Offline,
        })
    }

    /// Sign out: drop the token and the cached credential together.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.api.gateway().set_token(None);
        self.store.clear_credential().await?;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Put a persisted session token back into the gateway.
    ///
    /// Returns the profile if a token was restored.
    pub async fn restore(&self) -> Result<Option<UserProfile>, AuthError> {
        match self.store.cached_credential().await? {
            Some(CachedCredential {
                token: Some(token),
                user,
                ..
            }) => {
                self.api.gateway().set_token(Some(token));
                Ok(Some(user))
            }
            _ => Ok(None),
        }
    }

    /// Profile of the cached login, if any.
    pub async fn current_user(&self) -> Result<Option<UserProfile>, AuthError> {
        Ok(self.store.cached_credential().await?.map(|c| c.user))
    }
}
