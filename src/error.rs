use crate::record::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to serialize: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("No status with id {0}")]
    NotFound(RecordId),

    #[error("Identity '{identity}' rejected: {reason}")]
    IdentityConflict { identity: String, reason: String },

    #[error("Rejected by node: {0}")]
    Rejected(String),

    #[error("Peer {peer} is unreachable: {source}")]
    PeerUnreachable {
        peer: String,
        source: Box<Error>,
    },

    #[error("Peer {peer} did not answer within {timeout_ms}ms")]
    PeerTimeout { peer: String, timeout_ms: u128 },

    #[error("Peer answered with an error: {0}")]
    Remote(String),

    #[error("Unexpected response from peer: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid peer address '{0}', expected host:port")]
    InvalidPeerAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
