use crate::broadcast::{ChannelBroadcaster, StatusEvent};
use crate::node::Node;
use crate::peer::Peer;
use crate::presence::ConnectionId;
use crate::proto::{read_frame, write_frame, Push, Request, Response, SessionMessage};
use crate::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Pushes queued for one session before its reader is slowed down.
const SESSION_BUFFER: usize = 64;

/// TCP front end of a [`Node`].
///
/// Every connection starts with one [`Request`] frame. Most requests get one
/// [`Response`] and the connection ends; [`Request::Subscribe`] turns the
/// connection into a push-channel session instead.
pub struct StatusServer<P> {
    listener: TcpListener,
    node: Arc<Node<P, ChannelBroadcaster>>,
}

impl<P> StatusServer<P>
where
    P: Peer,
{
    pub async fn bind(addr: impl ToSocketAddrs, node: Arc<Node<P, ChannelBroadcaster>>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, node))
    }

    /// Serve on a listener that is already bound.
    pub fn new(listener: TcpListener, node: Arc<Node<P, ChannelBroadcaster>>) -> Self {
        Self { listener, node }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(addr = %self.local_addr()?, "statusd listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    debug!(%remote, "Connection established");
                    let node = self.node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, node).await {
                            error!(%remote, error = %e, "Connection failed");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("Listener stopped");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection<P: Peer>(
    mut stream: TcpStream,
    node: Arc<Node<P, ChannelBroadcaster>>,
) -> Result<()> {
    let request: Request = match read_frame(&mut stream).await? {
        Some(request) => request,
        None => return Ok(()),
    };

    let response = match request {
        Request::Subscribe => return run_session(stream, node).await,
        Request::Create { identity, text } => Response::Status(node.create(&identity, &text).await),
        Request::Update { id, identity, text } => {
            into_response(node.update(id, &identity, &text).await.map(Response::Status))
        }
        Request::Get { id } => match node.get(id) {
            Some(record) => Response::Status(record),
            None => Response::NotFound(id),
        },
        Request::Delete { id } => into_response(node.delete(id).await.map(|_| Response::Ack)),
        Request::List | Request::Snapshot => Response::Statuses(node.list_all()),
        Request::ReplicateUpsert(record) => {
            node.replicate_upsert(record);
            Response::Ack
        }
        Request::ReplicateDelete { id } => {
            node.replicate_delete(id);
            Response::Ack
        }
        Request::IdentityActive { identity } => Response::Active(node.is_identity_active(&identity)),
    };
    write_frame(&mut stream, &response).await
}

fn into_response(result: Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(Error::NotFound(id)) => Response::NotFound(id),
        Err(Error::IdentityConflict { reason, .. }) => Response::Rejected(reason),
        Err(e) => Response::Error(e.to_string()),
    }
}

async fn run_session<P: Peer>(stream: TcpStream, node: Arc<Node<P, ChannelBroadcaster>>) -> Result<()> {
    let connection = node.open_connection();
    let (mut reader, writer) = stream.into_split();
    let (pushes, queued) = mpsc::channel(SESSION_BUFFER);
    let events = node.broadcaster().subscribe();
    let writer = tokio::spawn(write_pushes(connection, writer, queued, events));
    debug!(%connection, "Session opened");

    let _ = pushes.send(Push::Subscribed(connection)).await;
    let result = loop {
        let message: SessionMessage = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        match message {
            SessionMessage::Status { identity, text } => {
                if let Err(e) = node.post_status(connection, &identity, &text).await {
                    let reason = match e {
                        Error::IdentityConflict { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    let _ = pushes.send(Push::Error(reason)).await;
                }
            }
            SessionMessage::Disconnect { identity } => {
                node.disconnect(connection, &identity).await;
            }
            SessionMessage::RequestStatuses => {
                for record in node.snapshot_for(connection) {
                    let _ = pushes.send(Push::Init(record)).await;
                }
            }
        }
    };

    node.connection_closed(connection);
    drop(pushes);
    let _ = writer.await;
    debug!(%connection, "Session closed");
    result
}

async fn write_pushes(
    connection: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::Receiver<Push>,
    mut events: broadcast::Receiver<StatusEvent>,
) {
    loop {
        let push = tokio::select! {
            push = queued.recv() => match push {
                Some(push) => push,
                None => break,
            },
            event = events.recv() => match event {
                Ok(StatusEvent::Upsert(record)) => Push::Status(record),
                Ok(StatusEvent::Delete(id)) => Push::Delete(id),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%connection, missed, "Session fell behind the board");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Err(e) = write_frame(&mut writer, &push).await {
            debug!(%connection, error = %e, "Session writer stopped");
            break;
        }
    }
}
