use crate::record::{identity_key, IdGenerator, RecordId, StatusRecord};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Result of applying a record received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The record is now stored. If another record held the same identity under
    /// a smaller id, that record was dropped and its id is returned.
    Stored { displaced: Option<RecordId> },

    /// A record with the same identity and a greater id is already held, the
    /// incoming record was ignored.
    Superseded { by: RecordId },
}

/// In-memory status store.
///
/// Records are keyed by [`RecordId`], with a secondary index from the
/// case-insensitive identity to the id that currently owns it. Both maps are
/// [`DashMap`]s so reads never block; every mutation goes through a single
/// write gate so that the two maps are always updated together and at most one
/// record per identity can exist.
#[derive(Clone, Debug)]
pub struct RecordStore {
    records: Arc<DashMap<RecordId, StatusRecord>>,

    /// Lowercased identity to the id of the record that owns it.
    identities: Arc<DashMap<String, RecordId>>,

    ids: Arc<IdGenerator>,

    writer: Arc<Mutex<()>>,
}

impl RecordStore {
    /// Create an empty store minting ids tagged with `node_id`.
    pub fn new(node_id: u16) -> RecordStore {
        RecordStore {
            records: Arc::new(DashMap::new()),
            identities: Arc::new(DashMap::new()),
            ids: Arc::new(IdGenerator::new(node_id)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn write_gate(&self) -> MutexGuard<'_, ()> {
        // The gate guards no data, a poisoned lock is still usable.
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `text` for `identity`, reusing the id of an existing record for the
    /// same identity or minting a new one.
    pub fn create_or_update(&self, identity: &str, text: &str) -> StatusRecord {
        let _gate = self.write_gate();
        let key = identity_key(identity);
        let existing = self.identities.get(&key).map(|id| *id);
        let id = existing.unwrap_or_else(|| self.ids.next_id());

        let record = StatusRecord::new(id, identity, text);
        self.records.insert(id, record.clone());
        self.identities.insert(key, id);
        debug!(%id, identity, text, created = existing.is_none(), "Stored status");
        record
    }

    /// Overwrite the record at `id`.
    pub fn update_by_id(&self, id: RecordId, identity: &str, text: &str) -> Result<StatusRecord> {
        let _gate = self.write_gate();
        let previous_key = self
            .records
            .get(&id)
            .map(|r| r.identity_key())
            .ok_or(Error::NotFound(id))?;

        let key = identity_key(identity);
        if key != previous_key {
            if let Some(holder) = self.identities.get(&key).map(|h| *h) {
                if holder != id {
                    return Err(Error::IdentityConflict {
                        identity: identity.to_string(),
                        reason: format!("already held by status {holder}"),
                    });
                }
            }
        }

        let record = StatusRecord::new(id, identity, text);
        self.records.insert(id, record.clone());
        if key != previous_key {
            self.identities.remove_if(&previous_key, |_, owner| *owner == id);
        }
        self.identities.insert(key, id);
        debug!(%id, identity, text, "Updated status");
        Ok(record)
    }

    pub fn get(&self, id: RecordId) -> Option<StatusRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn find_by_identity(&self, identity: &str) -> Option<StatusRecord> {
        let id = self.identities.get(&identity_key(identity)).map(|id| *id)?;
        self.get(id)
    }

    /// Remove the record at `id`, returning it.
    pub fn delete(&self, id: RecordId) -> Result<StatusRecord> {
        let _gate = self.write_gate();
        self.remove_locked(id).ok_or(Error::NotFound(id))
    }

    /// Apply a record received from a peer.
    ///
    /// Idempotent and never fails: an unknown id is inserted, a known one is
    /// overwritten. When the identity is already owned by a different id the
    /// greater id wins, so every node settles on the same record.
    pub fn replicate_upsert(&self, record: StatusRecord) -> Applied {
        let _gate = self.write_gate();
        let key = record.identity_key();

        let mut displaced = None;
        if let Some(holder) = self.identities.get(&key).map(|h| *h) {
            if holder > record.id {
                debug!(incoming = %record.id, %holder, "Ignoring replicated status for identity owned by newer id");
                return Applied::Superseded { by: holder };
            }
            if holder != record.id {
                self.records.remove(&holder);
                displaced = Some(holder);
            }
        }

        // An id can move to another identity through `update_by_id` on any
        // node; drop the stale index entry. Two nodes sharing a node tag look
        // the same from here, so say so loudly.
        if let Some(old) = self.records.get(&record.id).map(|r| r.identity.clone()) {
            let old_key = identity_key(&old);
            if old_key != key {
                warn!(
                    id = %record.id,
                    from = %old,
                    to = %record.identity,
                    node_tag = record.id.node(),
                    "Replicated status moves id to another identity"
                );
                self.identities
                    .remove_if(&old_key, |_, owner| *owner == record.id);
            }
        }

        let id = record.id;
        self.records.insert(id, record);
        self.identities.insert(key, id);
        Applied::Stored { displaced }
    }

    /// Remove a record on behalf of a peer, a missing id is not an error.
    pub fn replicate_delete(&self, id: RecordId) -> Option<StatusRecord> {
        let _gate = self.write_gate();
        self.remove_locked(id)
    }

    fn remove_locked(&self, id: RecordId) -> Option<StatusRecord> {
        let (_, record) = self.records.remove(&id)?;
        self.identities
            .remove_if(&record.identity_key(), |_, owner| *owner == id);
        debug!(%id, identity = %record.identity, "Removed status");
        Some(record)
    }

    /// Snapshot of every record, in no particular order.
    pub fn all(&self) -> Vec<StatusRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
