use crate::record::{RecordId, StatusRecord, MAX_NODE_ID};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Canonical `host:port` address of a node.
///
/// Parsing strips a URL scheme and trailing slashes and lowercases the host,
/// so `http://Server1:8080/` and `server1:8080` name the same node. Nodes are
/// told apart by exact equality of this form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Record id node tag derived from this address.
    ///
    /// FNV-1a over the canonical form, folded to 12 bits. Stable across
    /// builds and platforms, so every node computes the same tag for a given
    /// address.
    pub fn node_tag(&self) -> u16 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.0.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        ((hash ^ (hash >> 32)) & MAX_NODE_ID as u64) as u16
    }
}

impl FromStr for PeerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPeerAddress(s.to_string());
        let trimmed = s.trim();
        let without_scheme = trimmed
            .split_once("://")
            .map_or(trimmed, |(_, rest)| rest)
            .trim_end_matches('/');

        let (host, port) = without_scheme.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains('/') {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        Ok(PeerAddr(format!("{}:{}", host.to_lowercase(), port)))
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Another node, as seen from this one.
///
/// Every call is a single best-effort attempt. Callers bound them with
/// [`with_timeout`] and decide themselves whether a failure is retried,
/// ignored or surfaced.
pub trait Peer: Send + Sync + 'static {
    fn addr(&self) -> &PeerAddr;

    fn replicate_upsert(&self, record: &StatusRecord) -> impl Future<Output = Result<()>> + Send;

    fn replicate_delete(&self, id: RecordId) -> impl Future<Output = Result<()>> + Send;

    fn is_identity_active(&self, identity: &str) -> impl Future<Output = Result<bool>> + Send;

    fn snapshot_all(&self) -> impl Future<Output = Result<Vec<StatusRecord>>> + Send;
}

/// Run a call against `peer`, giving up after `timeout`.
pub async fn with_timeout<T>(
    peer: &PeerAddr,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::PeerTimeout {
            peer: peer.to_string(),
            timeout_ms: timeout.as_millis(),
        }),
    }
}
