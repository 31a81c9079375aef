use crate::broadcast::Broadcaster;
use crate::config::NodeConfig;
use crate::node::Node;
use crate::peer::Peer;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic work owned by a running node: the pending queue retry and the
/// lifecycle sweep. Both loops stop once [`BackgroundTasks::shutdown`] is
/// called.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn spawn<P, B>(node: Arc<Node<P, B>>, config: &NodeConfig) -> Self
    where
        P: Peer,
        B: Broadcaster,
    {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::with_capacity(2);

        let retry_node = node.clone();
        let mut stop = shutdown.subscribe();
        let mut ticker = interval(config.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        handles.push(tokio::spawn(async move {
            // The first tick completes immediately; nothing is queued yet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = retry_node.replication().retry_pending().await;
                        if !report.flushed.is_empty() || !report.stalled.is_empty() {
                            debug!(
                                flushed = report.flushed.len(),
                                stalled = report.stalled.len(),
                                delivered = report.delivered,
                                "Retry pass finished"
                            );
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("Retry task stopped");
        }));

        let sweeper = node.sweeper(config.lifecycle());
        let mut stop = shutdown.subscribe();
        let mut ticker = interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweeper.sweep().await;
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("Sweep task stopped");
        }));

        info!(
            node = %node.replication().local(),
            retry_ms = config.retry_interval.as_millis() as u64,
            sweep_ms = config.sweep_interval.as_millis() as u64,
            "Background tasks started"
        );
        Self { shutdown, handles }
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
