//! OfflineClient - the main interface for novaclub sync.
//!
//! This module provides [`OfflineClient`], the API applications use to read
//! and write club data whether or not the service is reachable.
//!
//! # Architecture
//!
//! ```text
//! Application → OfflineClient → LocalStore (writes, offline reads)
//!                    ↓               ↑
//!               SyncEngine ──────────┘
//!                    ↓
//!               RemoteApi → Gateway → Network
//! ```
//!
//! Writes are always local and optimistic: the record is stored and a queue
//! entry is appended in one transaction, and the sync engine replicates it
//! later. Reads go to the service while online and fall back to the local
//! store when it cannot be reached.
//!
//! # Example
//!
//! ```ignore
//! let client = OfflineClient::open(&config, data_dir).await?;
//! client.login("sensei@dojo.fr", "s3cret").await?;
//!
//! let members = EntityType::new("members")?;
//! client.save(&members, Record::new(RecordId::generate()).with_field("first_name", "Aiko")).await?;
//!
//! let handle = client.start_background();
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use novaclub_sync_core::{Phase, RetryPolicy, SyncEvent, Trigger};
use novaclub_sync_types::{DeadLetter, EntityType, QueueEntryId, Record, RecordId, Timestamp};

use crate::auth::{Argon2Params, Authenticator, Session};
use crate::config::ClientConfig;
use crate::connectivity::{ConnectivityProvider, ConnectivitySignal, ProbeConnectivity};
use crate::engine::{CycleReport, SyncEngine, SyncHandle};
use crate::error::{ClientError, GatewayError};
use crate::gateway::{Gateway, HttpGateway};
use crate::remote::RemoteApi;
use crate::storage::{LocalStore, Origin, SqliteStore};

/// Client over SQLite, HTTP and a probe-fed connectivity signal.
pub type DefaultClient = OfflineClient<SqliteStore, HttpGateway, ConnectivitySignal>;

/// Point-in-time view of the client for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    /// Current cycle phase.
    pub phase: Phase,
    /// Connectivity provider value.
    pub online: bool,
    /// Whether the offline indicator should be shown.
    pub offline: bool,
    /// Queued entries per entity type.
    pub queue_depth: BTreeMap<EntityType, usize>,
    /// Total queued entries.
    pub queued: usize,
    /// Dead-lettered entries.
    pub dead_letters: usize,
    /// Watermark per entity type.
    pub watermarks: BTreeMap<EntityType, Timestamp>,
    /// Whether a cached login exists.
    pub signed_in: bool,
    /// Email of the cached login.
    pub user: Option<String>,
    /// Whether a session token is held.
    pub has_session: bool,
    /// Last skipped, completed or failed cycle.
    pub last_event: Option<SyncEvent>,
    /// When the last cycle completed.
    pub last_completed_at: Option<Timestamp>,
}

/// Offline-first client.
pub struct OfflineClient<S, G, C> {
    store: Arc<S>,
    api: RemoteApi<G>,
    connectivity: Arc<C>,
    engine: SyncEngine<S, G, C>,
    auth: Authenticator<S, G, C>,
    interval: Duration,
    probe: Option<ProbeConnectivity>,
}

impl DefaultClient {
    /// Open the client described by `config`.
    ///
    /// Relative database paths are placed in `data_dir`, which must exist.
    /// A persisted session token is restored, and the health probe is
    /// started if enabled.
    pub async fn open(config: &ClientConfig, data_dir: &Path) -> Result<Self, ClientError> {
        let path = config.storage.resolve(data_dir);
        let store = Arc::new(SqliteStore::new(&path).await?);
        let gateway = Arc::new(HttpGateway::new(&config.remote.base_url, config.timeout())?);
        let signal = ConnectivitySignal::new(true);

        let mut client = Self::new(store, gateway, Arc::new(signal.clone()), config)?;
        client.auth.restore().await?;

        if config.connectivity.probe_enabled {
            let path = config.connectivity.probe_path.clone();
            signal.set_online(client.api.probe(&path).await);
            client.probe = Some(ProbeConnectivity::spawn(
                client.api.clone(),
                signal,
                path,
                config.probe_interval(),
            ));
        }

        tracing::info!(
            "Opened local store at {} (online: {})",
            path.display(),
            client.connectivity.is_online()
        );
        Ok(client)
    }
}

impl<S, G, C> OfflineClient<S, G, C>
where
    S: LocalStore + 'static,
    G: Gateway + 'static,
    C: ConnectivityProvider + 'static,
{
    /// Assemble a client from its parts.
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        connectivity: Arc<C>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let api = RemoteApi::new(gateway);
        let engine = SyncEngine::new(
            Arc::clone(&store),
            api.clone(),
            Arc::clone(&connectivity),
            config.entity_types()?,
            RetryPolicy::new(config.sync.max_attempts),
        );
        let auth = Authenticator::new(Arc::clone(&store), api.clone(), Arc::clone(&connectivity));

        Ok(Self {
            store,
            api,
            connectivity,
            engine,
            auth,
            interval: config.interval(),
            probe: None,
        })
    }

    /// Replace the password hashing parameters.
    pub fn with_hash_params(mut self, params: Argon2Params) -> Self {
        self.auth = Authenticator::with_params(
            Arc::clone(&self.store),
            self.api.clone(),
            Arc::clone(&self.connectivity),
            params,
        );
        self
    }

    /// The sync engine.
    pub fn engine(&self) -> &SyncEngine<S, G, C> {
        &self.engine
    }

    /// The local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Write a record locally and queue it for replication.
    ///
    /// A record without a tenant is stamped with the signed-in user's club.
    pub async fn save(
        &self,
        entity: &EntityType,
        mut record: Record,
    ) -> Result<Record, ClientError> {
        if record.tenant_id.is_none() {
            if let Some(user) = self.auth.current_user().await? {
                record.tenant_id = user.club_id;
            }
        }
        Ok(self.store.put(entity, record, Origin::Local).await?)
    }

    /// Delete a record locally and queue the deletion.
    pub async fn remove(&self, entity: &EntityType, id: &RecordId) -> Result<(), ClientError> {
        Ok(self.store.delete(entity, id, Origin::Local).await?)
    }

    /// Read one record.
    ///
    /// Records with queued local writes are always served locally.
    pub async fn get(
        &self,
        entity: &EntityType,
        id: &RecordId,
    ) -> Result<Option<Record>, ClientError> {
        let pending = self.store.pending_record_ids(entity).await?;
        if pending.contains(id) || !self.connectivity.is_online() {
            return Ok(self.store.get(entity, id).await?);
        }

        match self.api.fetch(entity, id).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_connectivity() => {
                tracing::debug!("Reading {}/{} locally: {}", entity, id, e);
                Ok(self.store.get(entity, id).await?)
            }
            Err(e) => Err(self.remote_failure(e).await),
        }
    }

    /// Read every record of an entity type.
    ///
    /// Online results are overlaid with queued local writes, so the caller
    /// sees its own optimistic changes.
    pub async fn list(&self, entity: &EntityType) -> Result<Vec<Record>, ClientError> {
        if !self.connectivity.is_online() {
            return Ok(self.store.get_all(entity).await?);
        }

        let mut records = match self.api.list(entity).await {
            Ok(records) => records,
            Err(e) if e.is_connectivity() => {
                tracing::debug!("Listing {} locally: {}", entity, e);
                return Ok(self.store.get_all(entity).await?);
            }
            Err(e) => return Err(self.remote_failure(e).await),
        };

        let pending = self.store.pending_record_ids(entity).await?;
        if !pending.is_empty() {
            records.retain(|r| !pending.contains(&r.id));
            for id in &pending {
                if let Some(local) = self.store.get(entity, id).await? {
                    records.push(local);
                }
            }
        }
        Ok(records)
    }

    async fn remote_failure(&self, error: GatewayError) -> ClientError {
        if error == GatewayError::Unauthorized {
            if let Err(e) = self.store.set_session_token(None).await {
                return e.into();
            }
        }
        error.into()
    }

    /// Sign in, online if possible.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        Ok(self.auth.login(email, password).await?)
    }

    /// Sign out and forget the cached login.
    pub async fn logout(&self) -> Result<(), ClientError> {
        Ok(self.auth.logout().await?)
    }

    /// Run one explicit sync cycle.
    pub async fn sync_now(&self) -> CycleReport {
        self.engine.run_cycle(Trigger::Explicit).await
    }

    /// Start the background sync loop at the configured interval.
    pub fn start_background(&self) -> SyncHandle<S, G, C> {
        self.engine.spawn(self.interval)
    }

    /// Subscribe to cycle events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.events()
    }

    /// Current status snapshot.
    pub async fn status(&self) -> Result<ClientStatus, ClientError> {
        let engine = self.engine.status();
        let queue_depth = self.engine.queue().depth_by_entity().await?;
        let credential = self.store.cached_credential().await?;

        Ok(ClientStatus {
            phase: engine.phase,
            online: self.connectivity.is_online(),
            offline: engine.is_offline() || !self.connectivity.is_online(),
            queued: queue_depth.values().sum(),
            queue_depth,
            dead_letters: self.store.dead_letters().await?.len(),
            watermarks: self.store.watermarks().await?,
            signed_in: credential.is_some(),
            user: credential.as_ref().map(|c| c.email.clone()),
            has_session: self.api.gateway().token().is_some(),
            last_event: engine.last_event,
            last_completed_at: engine.last_completed_at,
        })
    }

    /// Dead-lettered entries.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ClientError> {
        Ok(self.engine.queue().dead_letters().await?)
    }

    /// Put a dead letter back in the queue.
    pub async fn requeue(&self, id: QueueEntryId) -> Result<Option<QueueEntryId>, ClientError> {
        Ok(self.engine.queue().requeue(id).await?)
    }

    /// Whether the health probe is running.
    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }
}
