use super::ReplicationEngine;
use crate::peer::{with_timeout, Peer, PeerAddr};
use crate::store::RecordStore;
use tracing::{debug, info, warn};

/// Outcome of the startup pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Peer the store was seeded from, `None` if no peer answered.
    pub source: Option<PeerAddr>,
    pub applied: usize,
}

/// Seed `store` from the first peer that hands out a snapshot.
///
/// Peers are tried in configured order and only one snapshot is applied; there
/// is no merge across peers. If that peer is itself behind, so is this node
/// until new changes arrive.
pub async fn reconcile<P: Peer>(engine: &ReplicationEngine<P>, store: &RecordStore) -> Reconciliation {
    for peer in engine.peers() {
        let addr = peer.addr();
        debug!(peer = %addr, "Requesting snapshot");
        match with_timeout(addr, engine.timeout(), peer.snapshot_all()).await {
            Ok(records) => {
                let applied = records.len();
                for record in records {
                    store.replicate_upsert(record);
                }
                info!(peer = %addr, applied, "Reconciled from peer");
                return Reconciliation {
                    source: Some(addr.clone()),
                    applied,
                };
            }
            Err(e) => warn!(peer = %addr, error = %e, "Snapshot unavailable, trying next peer"),
        }
    }

    info!("No peer answered, starting with an empty store");
    Reconciliation::default()
}
