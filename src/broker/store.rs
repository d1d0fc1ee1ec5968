//! Token store: in-memory table of issued proxy tokens.
//!
//! [`TokenStore`] maps an opaque token string to its [`TokenRecord`]. It is the
//! only shared mutable state in the proxy and is always reached through an
//! explicitly owned `Arc<TokenStore>`, never a global.
//!
//! # Design
//!
//! - Reads take the shared side of a single `RwLock`; `add`, `remove` and
//!   `cleanup` take the exclusive side.
//! - Expiry is lazy: [`TokenStore::get`] hides an expired record but leaves it
//!   in the map. Deletion happens in [`TokenStore::cleanup`], which the
//!   background reaper runs on a fixed interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::audit::{self, AuditEvent};

/// Identity of the caller a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier
    pub id: String,
    /// Display name (used in request logs)
    pub name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Metadata stored for an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Owner of the token
    pub identity: Identity,
    /// Scope the token was issued for
    pub scope: String,
    /// When the token was issued
    pub created_at: DateTime<Utc>,
    /// Absolute expiry. Always present.
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// A record is live iff `now` is strictly before its expiry.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe, expiry-aware map from token to [`TokenRecord`].
#[derive(Debug, Default)]
pub struct TokenStore {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl TokenStore {
    /// Create an empty token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record. Callers are responsible for supplying an
    /// expiry in the future.
    pub fn add(&self, token: impl Into<String>, record: TokenRecord) {
        self.records.write().insert(token.into(), record);
    }

    /// Look up a live record.
    ///
    /// Returns `None` when the token is absent or its expiry has passed. An
    /// expired record stays in the map until the next [`cleanup`](Self::cleanup).
    #[must_use]
    pub fn get(&self, token: &str) -> Option<TokenRecord> {
        let now = Utc::now();
        let records = self.records.read();
        records
            .get(token)
            .filter(|record| record.is_live_at(now))
            .cloned()
    }

    /// Delete a token if present. Removing an absent token is not an error.
    ///
    /// Returns the removed record, if any.
    pub fn remove(&self, token: &str) -> Option<TokenRecord> {
        self.records.write().remove(token)
    }

    /// Delete every record whose expiry has passed as of the start of the
    /// scan. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.is_live_at(now));
        before - records.len()
    }

    /// Number of records physically held, including expired-but-unswept ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Handle to the background reaper task.
///
/// Dropping the handle does not stop the task; call [`Reaper::shutdown`] or
/// fire the shutdown channel it was spawned with.
pub struct Reaper {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawn a reaper that owns its own shutdown channel.
    #[must_use]
    pub fn start(store: Arc<TokenStore>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_reaper(store, interval, shutdown_rx);
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Token reaper task ended abnormally");
        }
    }
}

/// Spawn a background task that sweeps expired tokens every `interval`.
///
/// The task exits when the `shutdown` receiver fires or its sender is dropped.
pub fn spawn_reaper(
    store: Arc<TokenStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.cleanup();
                    audit::emit(&AuditEvent::reaped(reaped, store.len()));
                }
                _ = shutdown.recv() => {
                    debug!("Token reaper shutting down");
                    break;
                }
            }
        }
    })
}
