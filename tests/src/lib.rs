//! Integration tests for the Chord peer network
//!
//! This module exercises the integration testing framework itself: the
//! simulated network and the harness that drives real nodes over it.


use chord_lib::dht_messages::{DhtMessage, DhtResponse};
use chord_node::NetworkClient;
use integration::{NetworkInvariants, NetworkSimulator, TestHarness};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_network_simulation() {
    let simulator = NetworkSimulator::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    simulator
        .register_node("127.0.0.1:8001".to_string(), tx)
        .await;
    let responder = tokio::spawn(async move {
        let request = rx.recv().await.unwrap();
        assert_eq!(request.from, "127.0.0.1:8000");
        assert_eq!(request.message, DhtMessage::Ping);
        request.response_sender.send(DhtResponse::Pong).unwrap();
    });

    let client = simulator.create_client("127.0.0.1:8000".to_string());
    let response = client.call_node("127.0.0.1:8001", DhtMessage::Ping).await;

    assert_eq!(response, Ok(DhtResponse::Pong));
    responder.await.unwrap();
    assert_eq!(simulator.delivered_count(), 1);
}

#[tokio::test]
async fn test_unknown_address_is_unreachable() {
    let simulator = NetworkSimulator::new();
    let client = simulator.create_client("127.0.0.1:8000".to_string());

    let response = client.call_node("127.0.0.1:8999", DhtMessage::Ping).await;

    let error = response.unwrap_err();
    assert_eq!(error.address, "127.0.0.1:8999");
    assert_eq!(simulator.delivered_count(), 0);
}

#[tokio::test]
async fn test_failed_node_is_unreachable_until_recovered() {
    let harness = TestHarness::new();
    let a = harness.add_node(10, 8001).await.unwrap();
    let b = harness.add_node(200, 8002).await.unwrap();
    let client = harness.network().create_client(a.clone());

    harness.fail_node(&b).await;
    assert!(client.call_node(&b, DhtMessage::Ping).await.is_err());

    harness.recover_node(&b).await;
    assert_eq!(
        client.call_node(&b, DhtMessage::Ping).await,
        Ok(DhtResponse::Pong)
    );
}

#[tokio::test]
async fn test_drop_rate_drops_every_message() {
    let harness = TestHarness::new();
    let a = harness.add_node(10, 8001).await.unwrap();
    let b = harness.add_node(200, 8002).await.unwrap();
    let client = harness.network().create_client(a);

    harness.network().set_drop_rate(1.0).await;
    for _ in 0..5 {
        assert!(client.call_node(&b, DhtMessage::Ping).await.is_err());
    }
    assert_eq!(harness.network().delivered_count(), 0);

    harness.network().set_drop_rate(0.0).await;
    assert!(client.call_node(&b, DhtMessage::Ping).await.is_ok());
}

#[tokio::test]
async fn test_invariants_on_simple_network() {
    let harness = TestHarness::new();

    let node1 = harness.add_node(30, 8001).await.unwrap();
    let node2 = harness.add_node(110, 8002).await.unwrap();
    let node3 = harness.add_node(190, 8003).await.unwrap();

    harness.create_network(&node1).await.unwrap();
    harness.join_network(&node2, &node1).await.unwrap();
    harness.join_network(&node3, &node1).await.unwrap();

    harness.wait_for_stabilization(30).await.unwrap();

    let ring_violations = NetworkInvariants::check_ring_connectivity(&harness).await;
    assert!(ring_violations.is_empty(), "Ring should be connected: {:?}", ring_violations);

    let succ_violations = NetworkInvariants::check_successor_consistency(&harness).await;
    assert!(succ_violations.is_empty(), "Successors should be consistent: {:?}", succ_violations);

    let pred_violations = NetworkInvariants::check_predecessor_consistency(&harness).await;
    assert!(pred_violations.is_empty(), "Predecessors should be consistent: {:?}", pred_violations);

    let all_violations = NetworkInvariants::check_all(&harness).await;
    assert!(all_violations.is_empty(), "All invariants should hold: {:?}", all_violations);
}

#[tokio::test]
async fn test_latency_delays_delivery() {
    let harness = TestHarness::new();
    let a = harness.add_node(10, 8001).await.unwrap();
    let b = harness.add_node(200, 8002).await.unwrap();
    let client = harness.network().create_client(a);
    assert!(harness.network().is_node_registered(&b).await);

    harness.network().set_latency(30).await;
    let started = std::time::Instant::now();
    assert!(client.call_node(&b, DhtMessage::Ping).await.is_ok());
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));

    harness.network().unregister_node(&b).await;
    assert!(!harness.network().is_node_registered(&b).await);
    assert!(client.call_node(&b, DhtMessage::Ping).await.is_err());
}
