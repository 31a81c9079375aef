use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use statusd::{ChannelBroadcaster, Node, RemotePeer, ReplicationEngine, StatusServer};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[test]
fn server_rejects_removal_before_inactivity() {
    Command::cargo_bin("statusd")
        .unwrap()
        .args(&["--inactivity-timeout", "60", "--removal-timeout", "30"])
        .assert()
        .failure()
        .stderr(contains("removal timeout"));
}

#[test]
fn server_rejects_malformed_peers() {
    Command::cargo_bin("statusd")
        .unwrap()
        .args(&["--peers", "node1:8080,not-an-address"])
        .assert()
        .failure()
        .stderr(contains("not-an-address"));
}

#[test]
fn server_rejects_oversized_node_id() {
    Command::cargo_bin("statusd")
        .unwrap()
        .args(&["--node-id", "5000"])
        .assert()
        .failure()
        .stderr(contains("node id"));
}

#[test]
fn server_rejects_derived_node_id_shared_with_a_peer() {
    // Both addresses fold to node tag 165.
    Command::cargo_bin("statusd")
        .unwrap()
        .args(&["--addr", "127.0.0.1:20018", "--peers", "127.0.0.1:20142"])
        .assert()
        .failure()
        .stderr(contains("--node-id"));
}

#[test]
fn client_requires_a_subcommand() {
    Command::cargo_bin("status-client")
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn client_fails_without_a_server() {
    Command::cargo_bin("status-client")
        .unwrap()
        .args(&["list", "--addr", "127.0.0.1:1"])
        .assert()
        .failure();
}

#[test]
fn client_reports_failed_removal() {
    Command::cargo_bin("status-client")
        .unwrap()
        .args(&["rm", "5", "--addr", "127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(contains("Error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_talks_to_a_running_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let engine = ReplicationEngine::<RemotePeer>::new(
        addr.parse().unwrap(),
        Vec::new(),
        Duration::from_secs(1),
    );
    let node = Arc::new(Node::new(1, engine, ChannelBroadcaster::default()));
    tokio::spawn(StatusServer::new(listener, node.clone()).serve(std::future::pending()));

    let record = node.create("alice", "Busy").await;

    let client_addr = addr.clone();
    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("status-client")
            .unwrap()
            .args(&["list", "--addr", &client_addr])
            .assert()
            .success()
            .stdout(contains("alice").and(contains("Busy")));

        Command::cargo_bin("status-client")
            .unwrap()
            .args(&["create", "bob", "Away", "--addr", &client_addr])
            .assert()
            .success()
            .stdout(contains("bob"));

        Command::cargo_bin("status-client")
            .unwrap()
            .args(&["rm", &record.id.to_string(), "--addr", &client_addr])
            .assert()
            .success();

        Command::cargo_bin("status-client")
            .unwrap()
            .args(&["get", &record.id.to_string(), "--addr", &client_addr])
            .assert()
            .failure()
            .stderr(contains("Status not found"));
    })
    .await
    .unwrap();

    assert!(node.store().find_by_identity("alice").is_none());
    assert!(node.store().find_by_identity("bob").is_some());
}
