use crate::client::{unexpected, NodeClient};
use crate::peer::{Peer, PeerAddr};
use crate::proto::{Request, Response};
use crate::record::{RecordId, StatusRecord};
use crate::{Error, Result};

/// A peer reached over TCP, one connection per call.
///
/// Only connecting is bounded here; the replication engine bounds whole calls.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    addr: PeerAddr,
    client: NodeClient,
}

impl RemotePeer {
    pub fn new(addr: PeerAddr) -> Self {
        let client = NodeClient::new(addr.as_str());
        Self { addr, client }
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        self.client
            .call(request)
            .await
            .map_err(|e| Error::PeerUnreachable {
                peer: self.addr.to_string(),
                source: Box::new(e),
            })
    }
}

impl Peer for RemotePeer {
    fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    async fn replicate_upsert(&self, record: &StatusRecord) -> Result<()> {
        match self.call(&Request::ReplicateUpsert(record.clone())).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn replicate_delete(&self, id: RecordId) -> Result<()> {
        match self.call(&Request::ReplicateDelete { id }).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn is_identity_active(&self, identity: &str) -> Result<bool> {
        let request = Request::IdentityActive {
            identity: identity.to_string(),
        };
        match self.call(&request).await? {
            Response::Active(active) => Ok(active),
            other => Err(unexpected(other)),
        }
    }

    async fn snapshot_all(&self) -> Result<Vec<StatusRecord>> {
        match self.call(&Request::Snapshot).await? {
            Response::Statuses(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }
}
