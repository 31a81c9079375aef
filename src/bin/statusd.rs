use clap::Parser;
use statusd::config::{
    DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_PEER_TIMEOUT, DEFAULT_REMOVAL_TIMEOUT,
    DEFAULT_RETRY_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
use statusd::tasks::shutdown_signal;
use statusd::{
    BackgroundTasks, ChannelBroadcaster, Node, NodeConfig, PeerAddr, RemotePeer,
    ReplicationEngine, StatusServer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1:4000")]
    addr: String,

    /// Address peers use to reach this node; defaults to `--addr`.
    #[clap(long)]
    advertise: Option<PeerAddr>,

    /// Tag mixed into record ids minted here; must differ between nodes.
    /// Derived from the advertised address when omitted.
    #[clap(long)]
    node_id: Option<u16>,

    /// Every node of the board. This node's own address may be included.
    #[clap(long, value_delimiter = ',')]
    peers: Vec<PeerAddr>,

    /// Seconds without activity before an identity is shown as inactive.
    #[clap(long, default_value_t = DEFAULT_INACTIVITY_TIMEOUT.as_secs())]
    inactivity_timeout: u64,

    /// Seconds without activity before an identity is removed.
    #[clap(long, default_value_t = DEFAULT_REMOVAL_TIMEOUT.as_secs())]
    removal_timeout: u64,

    /// Seconds between retries of undelivered changes.
    #[clap(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_secs())]
    retry_interval: u64,

    /// Seconds between lifecycle sweeps.
    #[clap(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    sweep_interval: u64,

    /// Milliseconds to wait for any single peer call.
    #[clap(long, default_value_t = DEFAULT_PEER_TIMEOUT.as_millis() as u64)]
    peer_timeout: u64,

    #[clap(long, default_value = "info", env = "STATUSD_LOG")]
    log_level: tracing_subscriber::filter::LevelFilter,
}

impl App {
    fn config(&self) -> anyhow::Result<NodeConfig> {
        let advertise = match &self.advertise {
            Some(advertise) => advertise.clone(),
            None => self.addr.parse()?,
        };
        let mut config = match self.node_id {
            Some(node_id) => NodeConfig::new(advertise, node_id).with_peers(self.peers.clone()),
            None => {
                let config = NodeConfig::with_derived_node_id(advertise).with_peers(self.peers.clone());
                if let Some(peer) = config.peer_sharing_node_id() {
                    anyhow::bail!(
                        "derived node id {} is shared with peer {peer}, pass --node-id",
                        config.node_id
                    );
                }
                info!(node_id = config.node_id, advertise = %config.advertise, "Derived node id from advertised address");
                config
            }
        };
        config.inactivity_timeout = Duration::from_secs(self.inactivity_timeout);
        config.removal_timeout = Duration::from_secs(self.removal_timeout);
        config.retry_interval = Duration::from_secs(self.retry_interval);
        config.sweep_interval = Duration::from_secs(self.sweep_interval);
        config.peer_timeout = Duration::from_millis(self.peer_timeout);
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    tracing_subscriber::fmt()
        .with_max_level(app.log_level)
        .init();
    let config = app.config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = config.node_id,
        advertise = %config.advertise,
        "Starting statusd"
    );

    let peers = config.peers.iter().cloned().map(RemotePeer::new).collect();
    let engine = ReplicationEngine::new(config.advertise.clone(), peers, config.peer_timeout);
    let node = Arc::new(Node::new(config.node_id, engine, ChannelBroadcaster::default()));

    node.reconcile().await;

    let server = StatusServer::bind(&app.addr, node.clone()).await?;
    let tasks = BackgroundTasks::spawn(node, &config);
    server.serve(shutdown_signal()).await?;
    tasks.shutdown().await;

    Ok(())
}
