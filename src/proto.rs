//! Messages exchanged between nodes and clients.
//!
//! Every message is sent as a frame: a big-endian `u64` size hint followed by
//! the `bincode` encoded body, so the receiver can `read_exact` the body.

use crate::presence::ConnectionId;
use crate::record::{RecordId, StatusRecord};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are refused rather than allocated.
pub const MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Create {
        identity: String,
        text: String,
    },
    Update {
        id: RecordId,
        identity: String,
        text: String,
    },
    Get {
        id: RecordId,
    },
    Delete {
        id: RecordId,
    },
    List,

    /// Peer-to-peer: apply a record without fanning it out again.
    ReplicateUpsert(StatusRecord),
    ReplicateDelete {
        id: RecordId,
    },
    IdentityActive {
        identity: String,
    },
    Snapshot,

    /// Turn this connection into a push-channel session.
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Status(StatusRecord),
    Statuses(Vec<StatusRecord>),
    Active(bool),
    NotFound(RecordId),
    Rejected(String),
    Error(String),
}

/// Client to server, inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMessage {
    Status { identity: String, text: String },
    Disconnect { identity: String },
    RequestStatuses,
}

/// Server to client, inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Push {
    Subscribed(ConnectionId),
    Status(StatusRecord),
    Delete(RecordId),
    /// Reply to [`SessionMessage::RequestStatuses`], one per record.
    Init(StatusRecord),
    Error(String),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message)?;
    writer.write_u64(data.len() as u64).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `None` means the other side closed the connection cleanly
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let size = match reader.read_u64().await {
        Ok(size) => size,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if size > MAX_FRAME_SIZE {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {size} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        )));
    }

    let mut buf = vec![0; size as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}
