//! Presence tracking for push-channel connections.
//!
//! A connection claims an identity with its first status message. From then on
//! the identity counts as active on this node until the client disconnects
//! explicitly or the lifecycle sweep removes it. Closing a connection releases
//! the binding but keeps the last activity, so the sweep still ages the
//! identity out.

use crate::record::identity_key;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Reason sent to a client whose identity is held by another local connection.
pub const LOCAL_CONFLICT: &str = "Username already in use.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Connection currently holding the identity, `None` once it has gone away.
    pub connection: Option<ConnectionId>,
    pub identity: String,
    pub last_activity: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct PresenceTracker {
    /// Keyed by lowercased identity.
    entries: Arc<DashMap<String, PresenceEntry>>,
    connections: Arc<DashMap<ConnectionId, String>>,
    next_connection: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_connection(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn conflict(identity: &str) -> Error {
        Error::IdentityConflict {
            identity: identity.to_string(),
            reason: LOCAL_CONFLICT.to_string(),
        }
    }

    /// Fail if `identity` is held by a connection other than `connection`.
    pub fn check_local(&self, connection: ConnectionId, identity: &str) -> Result<()> {
        match self.holder(identity) {
            Some(holder) if holder != connection => Err(Self::conflict(identity)),
            _ => Ok(()),
        }
    }

    /// Connection currently holding `identity`.
    pub fn holder(&self, identity: &str) -> Option<ConnectionId> {
        self.entries
            .get(&identity_key(identity))
            .and_then(|e| e.connection)
    }

    /// Whether `connection` already holds `identity`.
    pub fn holds(&self, connection: ConnectionId, identity: &str) -> bool {
        self.holder(identity) == Some(connection)
    }

    /// Bind `identity` to `connection` and record activity at `at`.
    ///
    /// The local check is repeated atomically, so two connections racing for
    /// the same identity cannot both win here. A connection holds a single
    /// identity; binding a new one releases the previous one.
    pub fn bind(&self, connection: ConnectionId, identity: &str, at: DateTime<Utc>) -> Result<()> {
        let key = identity_key(identity);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if matches!(entry.connection, Some(holder) if holder != connection) {
                    return Err(Self::conflict(identity));
                }
                entry.connection = Some(connection);
                entry.identity = identity.to_string();
                entry.last_activity = entry.last_activity.max(at);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PresenceEntry {
                    connection: Some(connection),
                    identity: identity.to_string(),
                    last_activity: at,
                });
            }
        }

        if let Some(previous) = self.connections.insert(connection, key.clone()) {
            if previous != key {
                self.unbind(&previous, connection);
            }
        }
        Ok(())
    }

    fn unbind(&self, key: &str, connection: ConnectionId) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.connection == Some(connection) {
                entry.connection = None;
            }
        }
    }

    /// An identity is active while a connection holds it.
    pub fn is_active(&self, identity: &str) -> bool {
        self.holder(identity).is_some()
    }

    pub fn last_activity(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(&identity_key(identity))
            .map(|e| e.last_activity)
    }

    /// The connection went away; release its identity but keep the activity
    /// timestamp for the lifecycle sweep.
    pub fn release_connection(&self, connection: ConnectionId) -> Option<String> {
        let (_, key) = self.connections.remove(&connection)?;
        self.unbind(&key, connection);
        debug!(%connection, identity = %key, "Released connection");
        Some(key)
    }

    /// Explicit disconnect. Forgets the identity entirely if `connection` holds
    /// it or nobody does; returns whether it was forgotten.
    pub fn forget(&self, connection: ConnectionId, identity: &str) -> bool {
        let key = identity_key(identity);
        let removed = self
            .entries
            .remove_if(&key, |_, e| e.connection.map_or(true, |c| c == connection))
            .is_some();
        if removed {
            self.connections.remove_if(&connection, |_, k| *k == key);
        }
        removed
    }

    /// Run `f` while holding the entry for `identity`, provided its last
    /// activity is still older than `cutoff`. Activity recorded concurrently
    /// waits for `f` to finish, and activity recorded before this call makes
    /// it a no-op.
    pub fn while_idle<R>(
        &self,
        identity: &str,
        cutoff: DateTime<Utc>,
        f: impl FnOnce(&PresenceEntry) -> R,
    ) -> Option<R> {
        let entry = self.entries.get(&identity_key(identity))?;
        if entry.last_activity >= cutoff {
            return None;
        }
        Some(f(&entry))
    }

    /// Remove `identity` if its last activity is still older than `cutoff`.
    pub fn remove_if_idle(&self, identity: &str, cutoff: DateTime<Utc>) -> Option<PresenceEntry> {
        let key = identity_key(identity);
        let (_, entry) = self
            .entries
            .remove_if(&key, |_, e| e.last_activity < cutoff)?;
        if let Some(connection) = entry.connection {
            self.connections.remove_if(&connection, |_, k| *k == key);
        }
        Some(entry)
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<PresenceEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
