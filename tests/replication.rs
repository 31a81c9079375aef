mod common;

use common::Cluster;
use statusd::replication::PendingOp;
use statusd::{Error, StatusEvent};

// A status created on one node shows up on its peers.
#[tokio::test]
async fn create_reaches_peers() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));

    let record = node1.create("alice", "Busy").await;

    let replicated = node2.store().find_by_identity("alice").unwrap();
    assert_eq!(replicated.text, "Busy");
    assert_eq!(replicated.id, record.id);
    assert_eq!(node1.replication().pending_total(), 0);
}

// Changes for an unreachable peer wait in its queue until a retry gets through.
#[tokio::test]
async fn unreachable_peer_catches_up_on_retry() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));

    cluster.set_reachable(1, false);
    let record = node1.create("bob", "Away").await;
    assert_eq!(
        node1.replication().pending(cluster.addr(1)),
        vec![PendingOp::Upsert(record.clone())]
    );
    assert!(node2.store().find_by_identity("bob").is_none());

    let report = node1.replication().retry_pending().await;
    assert_eq!(report.stalled, vec![cluster.addr(1).clone()]);
    assert_eq!(node1.replication().pending_total(), 1);

    cluster.set_reachable(1, true);
    let report = node1.replication().retry_pending().await;
    assert_eq!(report.flushed, vec![cluster.addr(1).clone()]);
    assert_eq!(node1.replication().pending_total(), 0);
    assert_eq!(node2.get(record.id), Some(record));
}

// An identity held on one node cannot be claimed on another.
#[tokio::test]
async fn identity_active_on_peer_is_rejected() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));

    let conn1 = node1.open_connection();
    node1.post_status(conn1, "carol", "Online").await.unwrap();

    let conn2 = node2.open_connection();
    let claim = node2.post_status(conn2, "Carol", "Also online").await;
    assert!(matches!(
        claim,
        Err(Error::IdentityConflict { reason, .. }) if reason == statusd::node::PEER_CONFLICT
    ));
    assert!(!node2.is_identity_active("carol"));
    assert_eq!(node2.store().find_by_identity("carol").unwrap().text, "Online");
}

// Once the holder disconnects the identity is free everywhere.
#[tokio::test]
async fn disconnect_frees_identity_for_peers() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));

    let conn1 = node1.open_connection();
    let record = node1.post_status(conn1, "dora", "Here").await.unwrap();
    node1.disconnect(conn1, "dora").await;
    assert!(node2.get(record.id).is_none());

    let conn2 = node2.open_connection();
    let claimed = node2.post_status(conn2, "dora", "Moved").await.unwrap();
    assert_ne!(claimed.id, record.id);
    assert_eq!(node1.store().find_by_identity("dora"), Some(claimed));
}

#[tokio::test]
async fn own_address_is_never_a_peer() {
    let cluster = Cluster::started(3);
    let node1 = cluster.node(0);

    let peers: Vec<_> = node1
        .replication()
        .peers()
        .iter()
        .map(|p| statusd::Peer::addr(p).clone())
        .collect();
    assert_eq!(peers, vec![cluster.addr(1).clone(), cluster.addr(2).clone()]);

    let report = node1.replication().fan_out(&node1.create("erin", "x").await).await;
    assert_eq!(report.delivered, 2);
}

#[tokio::test]
async fn late_node_reconciles_from_first_reachable_peer() {
    let cluster = Cluster::new(3);
    let (node1, node2) = (cluster.start(0), cluster.start(1));
    node1.create("fay", "Lunch").await;
    node2.create("gus", "Meeting").await;

    cluster.set_reachable(0, false);
    let node3 = cluster.start(2);
    let reconciliation = node3.reconcile().await;

    assert_eq!(reconciliation.source.as_ref(), Some(cluster.addr(1)));
    assert_eq!(reconciliation.applied, 2);
    assert_eq!(node3.store().len(), 2);
}

#[tokio::test]
async fn lone_node_starts_empty() {
    let cluster = Cluster::new(2);
    let node1 = cluster.start(0);
    let reconciliation = node1.reconcile().await;
    assert_eq!(reconciliation.source, None);
    assert!(node1.store().is_empty());
}

#[tokio::test]
async fn replicated_changes_reach_local_subscribers() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));
    let mut events = node2.broadcaster().subscribe();

    let record = node1.create("hal", "Testing").await;
    node1.delete(record.id).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), StatusEvent::Upsert(record.clone()));
    assert_eq!(events.recv().await.unwrap(), StatusEvent::Delete(record.id));
}

// Two nodes that minted a record for the same identity agree on one of them.
#[tokio::test]
async fn concurrent_creates_converge_on_one_id() {
    let cluster = Cluster::started(2);
    let (node1, node2) = (cluster.node(0), cluster.node(1));

    cluster.set_reachable(0, false);
    cluster.set_reachable(1, false);
    let first = node1.create("ivy", "From one").await;
    let second = node2.create("ivy", "From two").await;
    cluster.set_reachable(0, true);
    cluster.set_reachable(1, true);

    node1.replication().retry_pending().await;
    node2.replication().retry_pending().await;

    let winner = first.id.max(second.id);
    assert_eq!(node1.store().find_by_identity("ivy").unwrap().id, winner);
    assert_eq!(node2.store().find_by_identity("ivy").unwrap().id, winner);
    assert_eq!(node1.store().len(), 1);
    assert_eq!(node2.store().len(), 1);
}
