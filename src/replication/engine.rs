use crate::peer::{with_timeout, Peer, PeerAddr};
use crate::record::{RecordId, StatusRecord};
use crate::Result;
use dashmap::DashMap;
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A change that still has to reach a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    Upsert(StatusRecord),
    Delete(RecordId),
}

impl PendingOp {
    pub fn id(&self) -> RecordId {
        match self {
            PendingOp::Upsert(record) => record.id,
            PendingOp::Delete(id) => *id,
        }
    }

    /// Whether delivering `self` makes delivering `other` pointless.
    ///
    /// A delete is final since ids are never reused. Between two upserts of the
    /// same record the later timestamp wins.
    pub fn supersedes(&self, other: &PendingOp) -> bool {
        if self.id() != other.id() {
            return false;
        }
        match (self, other) {
            (PendingOp::Delete(_), _) => true,
            (PendingOp::Upsert(new), PendingOp::Upsert(old)) => new.timestamp >= old.timestamp,
            (PendingOp::Upsert(_), PendingOp::Delete(_)) => false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub queued: usize,
}

enum PeerRetry {
    Idle,
    Flushed(usize),
    Stalled,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    /// Peers whose whole backlog was delivered and cleared.
    pub flushed: Vec<PeerAddr>,
    /// Peers that still have a backlog because a delivery failed.
    pub stalled: Vec<PeerAddr>,
    pub delivered: usize,
}

/// Pushes local changes to every peer and keeps a backlog for the ones that
/// could not be reached.
///
/// Retries are all-or-nothing per peer: a retry pass removes a peer's backlog
/// only if every queued change was delivered in that pass. One change that
/// keeps failing therefore holds back everything queued behind it for that
/// peer, but the queue never has gaps.
pub struct ReplicationEngine<P> {
    local: PeerAddr,
    peers: Vec<P>,
    timeout: Duration,
    pending: DashMap<PeerAddr, Vec<PendingOp>>,
}

impl<P> ReplicationEngine<P>
where
    P: Peer,
{
    /// Create an engine for the node advertised as `local`.
    ///
    /// Any peer whose canonical address equals `local` is dropped here, so the
    /// node never replicates to, reconciles from or asks itself.
    pub fn new(local: PeerAddr, peers: Vec<P>, timeout: Duration) -> Self {
        let peers: Vec<P> = peers
            .into_iter()
            .filter(|peer| {
                let is_self = *peer.addr() == local;
                if is_self {
                    debug!(peer = %peer.addr(), "Skipping own address in peer list");
                }
                !is_self
            })
            .collect();
        info!(%local, peers = peers.len(), "Replication engine ready");
        Self {
            local,
            peers,
            timeout,
            pending: DashMap::new(),
        }
    }

    /// Address this node is known by.
    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    pub fn peers(&self) -> &[P] {
        &self.peers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn deliver(&self, peer: &P, op: &PendingOp) -> Result<()> {
        let call = async {
            match op {
                PendingOp::Upsert(record) => peer.replicate_upsert(record).await,
                PendingOp::Delete(id) => peer.replicate_delete(*id).await,
            }
        };
        with_timeout(peer.addr(), self.timeout, call).await
    }

    /// Send `record` to every peer.
    pub async fn fan_out(&self, record: &StatusRecord) -> FanOutReport {
        self.broadcast(PendingOp::Upsert(record.clone())).await
    }

    /// Send the deletion of `id` to every peer.
    pub async fn fan_out_delete(&self, id: RecordId) -> FanOutReport {
        self.broadcast(PendingOp::Delete(id)).await
    }

    async fn broadcast(&self, op: PendingOp) -> FanOutReport {
        let op = &op;
        let outcomes = join_all(
            self.peers
                .iter()
                .map(|peer| async move { (peer.addr(), self.deliver(peer, op).await) }),
        )
        .await;

        let mut report = FanOutReport::default();
        for (addr, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(peer = %addr, id = %op.id(), "Replicated to peer");
                    self.drop_superseded(addr, op);
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(peer = %addr, id = %op.id(), error = %e, "Failed to replicate, queueing for retry");
                    self.enqueue(addr, op.clone());
                    report.queued += 1;
                }
            }
        }
        report
    }

    /// Park `op` for a later retry to `peer`.
    ///
    /// An operation is queued at most once per peer. Queued operations that
    /// `op` supersedes are dropped, and `op` is dropped if something already
    /// queued supersedes it.
    pub fn enqueue(&self, peer: &PeerAddr, op: PendingOp) {
        let mut queue = self.pending.entry(peer.clone()).or_default();
        if queue.iter().any(|queued| queued == &op || queued.supersedes(&op)) {
            return;
        }
        queue.retain(|queued| !op.supersedes(queued));
        queue.push(op);
        debug!(%peer, backlog = queue.len(), "Queued change for peer");
    }

    fn drop_superseded(&self, peer: &PeerAddr, delivered: &PendingOp) {
        if let Some(mut queue) = self.pending.get_mut(peer) {
            queue.retain(|queued| !delivered.supersedes(queued));
        }
        self.pending.remove_if(peer, |_, queue| queue.is_empty());
    }

    /// Retry every peer's backlog once.
    pub async fn retry_pending(&self) -> RetryReport {
        let outcomes = join_all(self.peers.iter().map(|peer| async move {
            (peer.addr(), self.retry_peer(peer).await)
        }))
        .await;

        let mut report = RetryReport::default();
        for (addr, outcome) in outcomes {
            match outcome {
                PeerRetry::Idle => {}
                PeerRetry::Flushed(delivered) => {
                    report.delivered += delivered;
                    report.flushed.push(addr.clone());
                }
                PeerRetry::Stalled => report.stalled.push(addr.clone()),
            }
        }
        report
    }

    async fn retry_peer(&self, peer: &P) -> PeerRetry {
        let addr = peer.addr();
        let batch = match self.pending.get(addr) {
            Some(queue) if !queue.is_empty() => queue.clone(),
            _ => return PeerRetry::Idle,
        };

        let mut failures = 0;
        for op in &batch {
            match self.deliver(peer, op).await {
                Ok(()) => debug!(peer = %addr, id = %op.id(), "Retried replication"),
                Err(e) => {
                    warn!(peer = %addr, id = %op.id(), error = %e, "Retry failed");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            warn!(peer = %addr, backlog = batch.len(), failures, "Keeping backlog for peer");
            return PeerRetry::Stalled;
        }

        // Changes queued while this pass was running stay for the next one.
        if let Some(mut queue) = self.pending.get_mut(addr) {
            queue.retain(|queued| !batch.contains(queued));
        }
        self.pending.remove_if(addr, |_, queue| queue.is_empty());
        info!(peer = %addr, delivered = batch.len(), "Backlog delivered");
        PeerRetry::Flushed(batch.len())
    }

    /// Ask every peer whether `identity` is active there and return the first
    /// that says yes.
    ///
    /// A peer that fails to answer counts as "not active": losing a peer must
    /// not stop clients from claiming identities.
    pub async fn identity_active_elsewhere(&self, identity: &str) -> Option<PeerAddr> {
        let answers = join_all(self.peers.iter().map(|peer| async move {
            let answer = with_timeout(
                peer.addr(),
                self.timeout,
                peer.is_identity_active(identity),
            )
            .await;
            (peer.addr(), answer)
        }))
        .await;

        let mut active = None;
        for (addr, answer) in answers {
            match answer {
                Ok(true) if active.is_none() => active = Some(addr.clone()),
                Ok(_) => {}
                Err(e) => {
                    warn!(peer = %addr, identity, error = %e, "Presence check failed, assuming not active")
                }
            }
        }
        active
    }

    /// Queued operations for `peer`, oldest first.
    pub fn pending(&self, peer: &PeerAddr) -> Vec<PendingOp> {
        self.pending
            .get(peer)
            .map(|queue| queue.clone())
            .unwrap_or_default()
    }

    pub fn pending_total(&self) -> usize {
        self.pending.iter().map(|queue| queue.len()).sum()
    }
}
