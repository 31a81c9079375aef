//! A status board replicated between equal peers.
//!
//! Each node keeps every status in memory, fans its own changes out to the
//! other nodes and pushes changes to locally connected clients. See [`Node`]
//! for the operations a node exposes and [`replication`] for how nodes keep in
//! step with each other.

pub mod broadcast;
pub mod client;
pub mod config;
mod error;
pub mod lifecycle;
pub mod node;
pub mod peer;
pub mod presence;
pub mod proto;
pub mod record;
pub mod replication;
pub mod server;
pub mod store;
pub mod tasks;

pub use broadcast::{Broadcaster, ChannelBroadcaster, StatusEvent};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleConfig, LifecycleSweeper, SweepReport};
pub use node::Node;
pub use peer::{Peer, PeerAddr};
pub use presence::{ConnectionId, PresenceTracker};
pub use record::{RecordId, StatusRecord, INACTIVE_SENTINEL};
pub use replication::{RemotePeer, ReplicationEngine};
pub use server::StatusServer;
pub use store::RecordStore;
pub use tasks::BackgroundTasks;
