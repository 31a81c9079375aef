//! Replication is achieved through best-effort fan-out between equal peers.
//!
//! Every node pushes its own changes to every other configured node through the
//! [`ReplicationEngine`]. Deliveries that fail are parked in a per-peer pending
//! queue and retried on a timer. Changes received from a peer are applied
//! locally and never forwarded again, so there is no replication loop.
//!
//! A node that starts up pulls a snapshot from the first peer that answers, see
//! [`reconcile`].

mod client;
pub(crate) mod engine;
mod reconcile;

pub use client::RemotePeer;
pub use engine::{FanOutReport, PendingOp, ReplicationEngine, RetryReport};
pub use reconcile::{reconcile, Reconciliation};
