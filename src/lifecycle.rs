//! Time driven demotion and removal of idle identities.
//!
//! An identity moves `Active -> Inactive` once its last activity is older than
//! the inactivity timeout, and `Inactive -> Removed` once it is older than the
//! removal timeout. Both transitions are replicated and broadcast like any
//! other local change.

use crate::broadcast::Broadcaster;
use crate::peer::Peer;
use crate::presence::PresenceTracker;
use crate::record::{RecordId, StatusRecord, INACTIVE_SENTINEL};
use crate::replication::ReplicationEngine;
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub inactivity_timeout: Duration,
    pub removal_timeout: Duration,
}

/// Records touched by one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub demoted: Vec<RecordId>,
    pub removed: Vec<RecordId>,
}

pub struct LifecycleSweeper<P, B> {
    store: RecordStore,
    presence: PresenceTracker,
    replication: Arc<ReplicationEngine<P>>,
    broadcaster: Arc<B>,
    config: LifecycleConfig,
}

fn cutoff(now: DateTime<Utc>, timeout: Duration) -> Option<DateTime<Utc>> {
    let timeout = chrono::Duration::from_std(timeout).ok()?;
    now.checked_sub_signed(timeout)
}

impl<P, B> LifecycleSweeper<P, B>
where
    P: Peer,
    B: Broadcaster,
{
    pub fn new(
        store: RecordStore,
        presence: PresenceTracker,
        replication: Arc<ReplicationEngine<P>>,
        broadcaster: Arc<B>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            presence,
            replication,
            broadcaster,
            config,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep every presence entry as of `now`.
    ///
    /// Each transition rechecks the entry's last activity while holding it, so
    /// activity recorded after the scan started keeps the identity alive.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let inactive_before = cutoff(now, self.config.inactivity_timeout);
        let remove_before = cutoff(now, self.config.removal_timeout);
        let mut report = SweepReport::default();

        for entry in self.presence.entries() {
            if let Some(remove_before) = remove_before {
                if entry.last_activity < remove_before {
                    if let Some(id) = self.remove(&entry.identity, remove_before).await {
                        report.removed.push(id);
                    }
                    continue;
                }
            }
            if let Some(inactive_before) = inactive_before {
                if entry.last_activity < inactive_before {
                    if let Some(record) = self.demote(&entry.identity, inactive_before) {
                        report.demoted.push(record.id);
                        self.replication.fan_out(&record).await;
                        self.broadcaster.publish_upsert(&record);
                    }
                }
            }
        }

        if !report.demoted.is_empty() || !report.removed.is_empty() {
            debug!(
                demoted = report.demoted.len(),
                removed = report.removed.len(),
                "Lifecycle sweep finished"
            );
        }
        report
    }

    fn demote(&self, identity: &str, cutoff: DateTime<Utc>) -> Option<StatusRecord> {
        self.presence
            .while_idle(identity, cutoff, |entry| {
                let record = self.store.find_by_identity(&entry.identity)?;
                if record.is_inactive() {
                    return None;
                }
                match self
                    .store
                    .update_by_id(record.id, &record.identity, INACTIVE_SENTINEL)
                {
                    Ok(record) => {
                        info!(id = %record.id, identity = %record.identity, "Marked identity inactive");
                        Some(record)
                    }
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "Failed to mark identity inactive");
                        None
                    }
                }
            })
            .flatten()
    }

    async fn remove(&self, identity: &str, cutoff: DateTime<Utc>) -> Option<RecordId> {
        let record = self.take_idle_record(identity, cutoff)?;
        if self.presence.remove_if_idle(identity, cutoff).is_none() {
            debug!(identity, "Identity became active during removal");
        }

        self.replication.fan_out_delete(record.id).await;
        self.broadcaster.publish_delete(record.id);
        Some(record.id)
    }

    /// Delete the record of `identity` while holding its presence entry, so a
    /// client refreshing the identity either lands before the recheck and keeps
    /// it, or after the delete and starts a new record.
    fn take_idle_record(&self, identity: &str, cutoff: DateTime<Utc>) -> Option<StatusRecord> {
        self.presence
            .while_idle(identity, cutoff, |entry| {
                let record = self.store.find_by_identity(&entry.identity)?;
                let record = self.store.delete(record.id).ok()?;
                info!(id = %record.id, identity = %record.identity, "Removed idle identity");
                Some(record)
            })
            .flatten()
            .or_else(|| {
                // Nothing left to delete; drop the entry if it is still idle.
                self.presence.remove_if_idle(identity, cutoff);
                None
            })
    }
}
