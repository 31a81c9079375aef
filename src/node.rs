use crate::broadcast::Broadcaster;
use crate::lifecycle::{LifecycleConfig, LifecycleSweeper};
use crate::peer::Peer;
use crate::presence::{ConnectionId, PresenceTracker};
use crate::record::{RecordId, StatusRecord};
use crate::replication::{reconcile, Reconciliation, ReplicationEngine};
use crate::store::{Applied, RecordStore};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Reason sent to a client whose identity is active on another node.
pub const PEER_CONFLICT: &str = "Username already in use on another server.";

/// A single status board node.
///
/// Local changes are stored, fanned out to peers and then published to local
/// subscribers. Changes replicated in from peers are stored and published but
/// never fanned out again.
pub struct Node<P, B> {
    store: RecordStore,
    presence: PresenceTracker,
    replication: Arc<ReplicationEngine<P>>,
    broadcaster: Arc<B>,
}

impl<P, B> Node<P, B>
where
    P: Peer,
    B: Broadcaster,
{
    pub fn new(node_id: u16, replication: ReplicationEngine<P>, broadcaster: B) -> Self {
        Self {
            store: RecordStore::new(node_id),
            presence: PresenceTracker::new(),
            replication: Arc::new(replication),
            broadcaster: Arc::new(broadcaster),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn replication(&self) -> &Arc<ReplicationEngine<P>> {
        &self.replication
    }

    pub fn broadcaster(&self) -> &Arc<B> {
        &self.broadcaster
    }

    async fn publish(&self, record: &StatusRecord) {
        let report = self.replication.fan_out(record).await;
        debug!(id = %record.id, delivered = report.delivered, queued = report.queued, "Fanned out status");
        self.broadcaster.publish_upsert(record);
    }

    async fn publish_delete(&self, id: RecordId) {
        let report = self.replication.fan_out_delete(id).await;
        debug!(%id, delivered = report.delivered, queued = report.queued, "Fanned out delete");
        self.broadcaster.publish_delete(id);
    }

    /// Set the status of `identity`, creating the record on first use.
    pub async fn create(&self, identity: &str, text: &str) -> StatusRecord {
        let record = self.store.create_or_update(identity, text);
        info!(id = %record.id, identity, text, "Status received");
        self.publish(&record).await;
        record
    }

    pub async fn update(&self, id: RecordId, identity: &str, text: &str) -> Result<StatusRecord> {
        let old = self.store.get(id).ok_or(Error::NotFound(id))?;
        let record = self.store.update_by_id(id, identity, text)?;
        info!(%id, identity, from = %old.text, to = %record.text, "Status updated");
        self.publish(&record).await;
        Ok(record)
    }

    pub fn get(&self, id: RecordId) -> Option<StatusRecord> {
        self.store.get(id)
    }

    pub async fn delete(&self, id: RecordId) -> Result<StatusRecord> {
        let record = self.store.delete(id)?;
        info!(%id, identity = %record.identity, "Status deleted");
        self.publish_delete(id).await;
        Ok(record)
    }

    pub fn list_all(&self) -> Vec<StatusRecord> {
        self.store.all()
    }

    /// Apply a record sent by a peer. Local subscribers are told, peers are not.
    pub fn replicate_upsert(&self, record: StatusRecord) -> Applied {
        debug!(id = %record.id, identity = %record.identity, "Replicated status received");
        let applied = self.store.replicate_upsert(record.clone());
        if let Applied::Stored { displaced } = &applied {
            if let Some(displaced) = displaced {
                info!(%displaced, kept = %record.id, identity = %record.identity, "Dropped conflicting status");
                self.broadcaster.publish_delete(*displaced);
            }
            self.broadcaster.publish_upsert(&record);
        }
        applied
    }

    pub fn replicate_delete(&self, id: RecordId) {
        if let Some(record) = self.store.replicate_delete(id) {
            debug!(%id, identity = %record.identity, "Replicated delete received");
            self.broadcaster.publish_delete(id);
        }
    }

    /// Whether a local connection currently holds `identity`.
    pub fn is_identity_active(&self, identity: &str) -> bool {
        self.presence.is_active(identity)
    }

    /// Seed the store from the first peer that answers.
    pub async fn reconcile(&self) -> Reconciliation {
        reconcile(&self.replication, &self.store).await
    }

    pub fn open_connection(&self) -> ConnectionId {
        self.presence.open_connection()
    }

    /// Status message from a push-channel connection.
    ///
    /// The first message for an identity on a connection claims it: the claim
    /// fails if another local connection holds the identity or any peer
    /// reports it active. The peer check and the local bind are not atomic
    /// together, two nodes can still accept the same identity at once.
    pub async fn post_status(
        &self,
        connection: ConnectionId,
        identity: &str,
        text: &str,
    ) -> Result<StatusRecord> {
        if !self.presence.holds(connection, identity) {
            self.presence.check_local(connection, identity).map_err(|e| {
                info!(identity, %connection, "Identity already connected on this node");
                e
            })?;
            if let Some(peer) = self.replication.identity_active_elsewhere(identity).await {
                info!(identity, %connection, %peer, "Identity already active on peer");
                return Err(Error::IdentityConflict {
                    identity: identity.to_string(),
                    reason: PEER_CONFLICT.to_string(),
                });
            }
        }
        self.presence.bind(connection, identity, Utc::now())?;

        let old = self.store.find_by_identity(identity);
        let record = self.store.create_or_update(identity, text);
        match old {
            Some(old) => info!(identity, %connection, from = %old.text, to = %record.text, "Session status updated"),
            None => info!(identity, %connection, text = %record.text, "Session status created"),
        }
        self.publish(&record).await;
        Ok(record)
    }

    /// Explicit disconnect of `identity` from `connection`. Removes the record
    /// everywhere; ignored if another connection holds the identity.
    pub async fn disconnect(&self, connection: ConnectionId, identity: &str) -> Option<RecordId> {
        if !self.presence.forget(connection, identity) {
            debug!(identity, %connection, "Disconnect for identity not held by connection");
            return None;
        }
        let record = self.store.find_by_identity(identity)?;
        self.store.delete(record.id).ok()?;
        info!(identity, %connection, id = %record.id, "Client disconnected");
        self.publish_delete(record.id).await;
        Some(record.id)
    }

    /// Every record, for a session that asked for the whole board.
    pub fn snapshot_for(&self, connection: ConnectionId) -> Vec<StatusRecord> {
        let records = self.store.all();
        debug!(%connection, records = records.len(), "Sending board to session");
        records
    }

    /// The transport lost `connection`.
    pub fn connection_closed(&self, connection: ConnectionId) {
        if let Some(identity) = self.presence.release_connection(connection) {
            debug!(%connection, identity = %identity, "Connection closed");
        }
    }

    pub fn sweeper(&self, config: LifecycleConfig) -> LifecycleSweeper<P, B> {
        LifecycleSweeper::new(
            self.store.clone(),
            self.presence.clone(),
            self.replication.clone(),
            self.broadcaster.clone(),
            config,
        )
    }
}
