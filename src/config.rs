use crate::lifecycle::LifecycleConfig;
use crate::peer::PeerAddr;
use crate::record::MAX_NODE_ID;
use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a node needs to know about itself and its siblings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address other nodes use to reach this one. Entries in `peers` equal to
    /// it are this node.
    pub advertise: PeerAddr,

    /// Tag mixed into every record id minted here. Must differ between nodes.
    pub node_id: u16,

    /// Sibling nodes in the order they are tried during reconciliation.
    pub peers: Vec<PeerAddr>,

    pub inactivity_timeout: Duration,
    pub removal_timeout: Duration,
    pub retry_interval: Duration,
    pub sweep_interval: Duration,

    /// Upper bound for any single call to a peer.
    pub peer_timeout: Duration,
}

impl NodeConfig {
    pub fn new(advertise: PeerAddr, node_id: u16) -> Self {
        Self {
            advertise,
            node_id,
            peers: Vec::new(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            removal_timeout: DEFAULT_REMOVAL_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }

    /// Config whose node tag is derived from `advertise`.
    pub fn with_derived_node_id(advertise: PeerAddr) -> Self {
        let node_id = advertise.node_tag();
        Self::new(advertise, node_id)
    }

    /// A peer whose address derives the same tag as this node's id. Two such
    /// nodes both running on derived tags would mint the same ids.
    pub fn peer_sharing_node_id(&self) -> Option<&PeerAddr> {
        self.peers
            .iter()
            .find(|peer| **peer != self.advertise && peer.node_tag() == self.node_id)
    }

    pub fn with_peers(mut self, peers: Vec<PeerAddr>) -> Self {
        self.peers = peers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id > MAX_NODE_ID {
            return Err(Error::InvalidConfig(format!(
                "node id {} does not fit in 12 bits (max {MAX_NODE_ID})",
                self.node_id
            )));
        }
        if self.removal_timeout <= self.inactivity_timeout {
            return Err(Error::InvalidConfig(format!(
                "removal timeout ({:?}) must be longer than inactivity timeout ({:?})",
                self.removal_timeout, self.inactivity_timeout
            )));
        }
        for (name, value) in [
            ("retry interval", self.retry_interval),
            ("sweep interval", self.sweep_interval),
            ("peer timeout", self.peer_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            inactivity_timeout: self.inactivity_timeout,
            removal_timeout: self.removal_timeout,
        }
    }
}
