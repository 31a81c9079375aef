use crate::record::{RecordId, StatusRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// A change to the store, as seen by locally subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEvent {
    Upsert(StatusRecord),
    Delete(RecordId),
}

/// Notifies local subscribers about store changes.
pub trait Broadcaster: Send + Sync + 'static {
    fn publish_upsert(&self, record: &StatusRecord);
    fn publish_delete(&self, id: RecordId);
}

/// [`Broadcaster`] backed by a tokio broadcast channel. Each push-channel
/// session holds one receiver.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, event: StatusEvent) {
        // Sending only fails when nobody is listening.
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!(?event, "No subscribers for event");
        }
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish_upsert(&self, record: &StatusRecord) {
        self.send(StatusEvent::Upsert(record.clone()));
    }

    fn publish_delete(&self, id: RecordId) {
        self.send(StatusEvent::Delete(id));
    }
}
