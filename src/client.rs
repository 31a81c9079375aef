use crate::proto::{read_frame, write_frame, Push, Request, Response, SessionMessage};
use crate::record::{RecordId, StatusRecord};
use crate::{Error, Result};
use clap::Subcommand;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use std::time::Duration;
use tokio::net::TcpStream;

/// How long [`NodeClient`] waits for a connection to be accepted.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Actions that can be performed by the client.
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Set the status for an identity, creating it if needed.
    Create { identity: String, text: String },

    /// Show the status with the provided id.
    Get { id: u64 },

    /// Overwrite the status with the provided id.
    Update {
        id: u64,
        identity: String,
        text: String,
    },

    /// Remove the status with the provided id.
    #[clap(name = "rm")]
    Remove { id: u64 },

    /// List every status known to the node.
    List,

    /// Claim an identity and stream the board; each line on stdin becomes
    /// the new status, `/quit` disconnects.
    Watch {
        #[clap(long)]
        identity: String,
    },
}

/// Sends one request per connection to a node.
#[derive(Debug, Clone)]
pub struct NodeClient {
    addr: String,
    connect_timeout: Duration,
}

impl NodeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(Error::PeerTimeout {
                peer: self.addr.clone(),
                timeout_ms: self.connect_timeout.as_millis(),
            }),
        }
    }

    pub async fn call(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await?.ok_or_else(|| {
            Error::UnexpectedResponse(format!("{} closed the connection", self.addr))
        })
    }

    pub async fn create(&self, identity: &str, text: &str) -> Result<StatusRecord> {
        let request = Request::Create {
            identity: identity.to_string(),
            text: text.to_string(),
        };
        match self.call(&request).await? {
            Response::Status(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<StatusRecord>> {
        match self.call(&Request::Get { id }).await? {
            Response::Status(record) => Ok(Some(record)),
            Response::NotFound(_) => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update(&self, id: RecordId, identity: &str, text: &str) -> Result<StatusRecord> {
        let request = Request::Update {
            id,
            identity: identity.to_string(),
            text: text.to_string(),
        };
        match self.call(&request).await? {
            Response::Status(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    pub async fn remove(&self, id: RecordId) -> Result<()> {
        match self.call(&Request::Delete { id }).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<StatusRecord>> {
        match self.call(&Request::List).await? {
            Response::Statuses(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }

    /// Open a push-channel session.
    pub async fn subscribe(&self) -> Result<Session> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, &Request::Subscribe).await?;
        Ok(Session {
            pushes: PushStream { reader },
            sink: SessionSink { writer },
        })
    }
}

/// Map a response the caller did not ask for into an error.
pub fn unexpected(response: Response) -> Error {
    match response {
        Response::NotFound(id) => Error::NotFound(id),
        Response::Rejected(reason) => Error::Rejected(reason),
        Response::Error(message) => Error::Remote(message),
        other => Error::UnexpectedResponse(format!("{other:?}")),
    }
}

/// Client half of a push-channel session.
pub struct Session {
    pushes: PushStream,
    sink: SessionSink,
}

impl Session {
    pub async fn send(&mut self, message: &SessionMessage) -> Result<()> {
        self.sink.send(message).await
    }

    pub async fn post_status(&mut self, identity: &str, text: &str) -> Result<()> {
        self.sink.post_status(identity, text).await
    }

    /// Next push from the server, `None` once the server hung up.
    pub async fn next_push(&mut self) -> Result<Option<Push>> {
        self.pushes.next_push().await
    }

    /// Split the session so pushes can be read on another task.
    pub fn split(self) -> (PushStream, SessionSink) {
        (self.pushes, self.sink)
    }
}

/// Reading half of a [`Session`].
pub struct PushStream {
    reader: OwnedReadHalf,
}

impl PushStream {
    /// A partially read frame is lost if the returned future is dropped, so do
    /// not race this in a `select!`.
    pub async fn next_push(&mut self) -> Result<Option<Push>> {
        read_frame(&mut self.reader).await
    }
}

/// Writing half of a [`Session`].
pub struct SessionSink {
    writer: OwnedWriteHalf,
}

impl SessionSink {
    pub async fn send(&mut self, message: &SessionMessage) -> Result<()> {
        write_frame(&mut self.writer, message).await
    }

    pub async fn post_status(&mut self, identity: &str, text: &str) -> Result<()> {
        self.send(&SessionMessage::Status {
            identity: identity.to_string(),
            text: text.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn rejections_keep_the_node_reason() {
        let error = unexpected(Response::Rejected("already held by status 7".to_string()));
        assert!(matches!(&error, Error::Rejected(reason) if reason == "already held by status 7"));
        assert_eq!(error.to_string(), "Rejected by node: already held by status 7");
    }

    #[tokio::test]
    async fn unroutable_address_fails_instead_of_hanging() {
        let client = NodeClient::new("10.255.255.1:9").with_connect_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), client.call(&Request::List))
            .await
            .expect("connect was not bounded");
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
