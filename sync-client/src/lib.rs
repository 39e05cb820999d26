//! # sync-client
//!
//! Offline-first client library for novaclub sync.
//!
//! Applications keep working against a local store while the remote club
//! management service is unreachable, and the client replicates queued
//! writes once connectivity returns.
//!
//! ## Features
//!
//! - **Durable Local Store**: SQLite in WAL mode; record writes and queue appends are atomic
//! - **Mutation Queue**: FIFO per entity, retry limits and a dead-letter list
//! - **Push-then-Pull Cycles**: Driven by the pure state machine in sync-core
//! - **Watermarked Pull**: Per-entity watermarks that never move backwards
//! - **Offline Login**: Argon2id credential cache, scaled to available RAM
//! - **Gateway Abstraction**: Pluggable HTTP layer (reqwest, mock)
//!
//! ## Example
//!
//! ```ignore
//! use novaclub_sync_client::{ClientConfig, OfflineClient};
//! use novaclub_sync_types::{EntityType, Record, RecordId};
//!
//! let config = ClientConfig::from_file(path)?;
//! let client = OfflineClient::open(&config, data_dir).await?;
//! client.login("sensei@dojo.fr", "s3cret").await?;
//!
//! // Works offline: stored locally and queued
//! let members = EntityType::new("members")?;
//! client.save(&members, Record::new(RecordId::generate())).await?;
//!
//! // Replicate now, or start the background loop
//! client.sync_now().await;
//! let handle = client.start_background();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod remote;
pub mod storage;

pub use auth::{Argon2Params, Authenticator, Session, SessionMode};
pub use client::{ClientStatus, DefaultClient, OfflineClient};
pub use config::{ClientConfig, ConfigError};
pub use connectivity::{ConnectivityProvider, ConnectivitySignal, ProbeConnectivity};
pub use engine::{CycleReport, SyncEngine, SyncHandle, SyncStatus};
pub use error::{AuthError, ClientError, GatewayError, StorageError};
pub use gateway::{ApiRequest, Gateway, HttpGateway, Method, MockGateway};
pub use queue::MutationQueue;
pub use remote::RemoteApi;
pub use storage::{CachedCredential, LocalStore, Origin, RejectionOutcome, SqliteStore};
