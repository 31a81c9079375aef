#![allow(dead_code)]

use statusd::{
    ChannelBroadcaster, Error, Node, Peer, PeerAddr, RecordId, ReplicationEngine, Result,
    StatusRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub type TestNode = Node<LocalPeer, ChannelBroadcaster>;

pub const PEER_TIMEOUT: Duration = Duration::from_millis(200);

/// A peer that calls straight into another in-process node.
///
/// All handles for the same node share its slot and reachability flag, so
/// taking a node down makes it unreachable from everyone.
#[derive(Clone)]
pub struct LocalPeer {
    addr: PeerAddr,
    target: Arc<OnceLock<Arc<TestNode>>>,
    reachable: Arc<AtomicBool>,
}

impl LocalPeer {
    fn target(&self) -> Result<&Arc<TestNode>> {
        let refused = || Error::PeerUnreachable {
            peer: self.addr.to_string(),
            source: Box::new(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        };
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(refused());
        }
        self.target.get().ok_or_else(refused)
    }
}

impl Peer for LocalPeer {
    fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    async fn replicate_upsert(&self, record: &StatusRecord) -> Result<()> {
        self.target()?.replicate_upsert(record.clone());
        Ok(())
    }

    async fn replicate_delete(&self, id: RecordId) -> Result<()> {
        self.target()?.replicate_delete(id);
        Ok(())
    }

    async fn is_identity_active(&self, identity: &str) -> Result<bool> {
        Ok(self.target()?.is_identity_active(identity))
    }

    async fn snapshot_all(&self) -> Result<Vec<StatusRecord>> {
        Ok(self.target()?.list_all())
    }
}

/// A set of in-process nodes that list each other, and themselves, as peers.
pub struct Cluster {
    addrs: Vec<PeerAddr>,
    slots: Vec<Arc<OnceLock<Arc<TestNode>>>>,
    reachable: Vec<Arc<AtomicBool>>,
}

impl Cluster {
    /// Reserve `size` nodes without starting any of them.
    pub fn new(size: usize) -> Self {
        Self {
            addrs: (0..size)
                .map(|i| format!("node{}:7000", i + 1).parse().unwrap())
                .collect(),
            slots: (0..size).map(|_| Arc::new(OnceLock::new())).collect(),
            reachable: (0..size).map(|_| Arc::new(AtomicBool::new(true))).collect(),
        }
    }

    /// Reserve and start `size` nodes.
    pub fn started(size: usize) -> Self {
        let cluster = Self::new(size);
        for i in 0..size {
            cluster.start(i);
        }
        cluster
    }

    pub fn start(&self, index: usize) -> Arc<TestNode> {
        let peers = (0..self.addrs.len())
            .map(|i| LocalPeer {
                addr: self.addrs[i].clone(),
                target: self.slots[i].clone(),
                reachable: self.reachable[i].clone(),
            })
            .collect();
        let engine = ReplicationEngine::new(self.addrs[index].clone(), peers, PEER_TIMEOUT);
        let node = Arc::new(Node::new(
            index as u16 + 1,
            engine,
            ChannelBroadcaster::default(),
        ));
        assert!(self.slots[index].set(node.clone()).is_ok(), "node started twice");
        node
    }

    pub fn node(&self, index: usize) -> Arc<TestNode> {
        self.slots[index].get().cloned().expect("node not started")
    }

    pub fn addr(&self, index: usize) -> &PeerAddr {
        &self.addrs[index]
    }

    pub fn set_reachable(&self, index: usize, reachable: bool) {
        self.reachable[index].store(reachable, Ordering::SeqCst);
    }
}
