use chord_integration_tests::integration::{eventually, NetworkInvariants, TestHarness};
use chord_lib::ChordId;
use std::time::Duration;

async fn four_node_ring() -> (TestHarness, Vec<String>) {
    let harness = TestHarness::new();
    let mut addresses = Vec::new();
    for (i, id) in [20u32, 80, 150, 220].iter().enumerate() {
        addresses.push(harness.add_node(*id, 8001 + i as u16).await.unwrap());
    }
    harness.create_network(&addresses[0]).await.unwrap();
    for address in &addresses[1..] {
        harness.join_network(address, &addresses[0]).await.unwrap();
        harness.trigger_stabilization_round().await;
    }
    harness.wait_for_stabilization(30).await.unwrap();
    harness.trigger_stabilization_cycles(3).await;
    (harness, addresses)
}

#[tokio::test]
async fn test_successor_failure_promotes_next() {
    let (harness, addresses) = four_node_ring().await;
    let node_20 = harness.get_node(&addresses[0]).await.unwrap();
    let node_150 = harness.get_node(&addresses[2]).await.unwrap();

    harness.fail_node(&addresses[1]).await;
    node_20.check_successor().await.unwrap();

    assert_eq!(node_20.get_successor(), node_150.info);
    assert!(!node_20
        .state
        .successor_list()
        .iter()
        .any(|a| a.socket_address() == addresses[1]));
}

#[tokio::test]
async fn test_dead_predecessor_is_cleared() {
    let (harness, addresses) = four_node_ring().await;
    let node_150 = harness.get_node(&addresses[2]).await.unwrap();

    harness.fail_node(&addresses[1]).await;
    node_150.check_predecessor().await.unwrap();

    assert_eq!(node_150.get_predecessor(), None);
}

#[tokio::test]
async fn test_data_survives_owner_failure() {
    let (harness, addresses) = four_node_ring().await;

    // 60 is owned by node 80 and replicated on 150 and 220
    let key = ChordId::from(60u32);
    assert!(harness.put(&addresses[0], key.clone(), "sixty").await.unwrap());
    let node_150 = harness.get_node(&addresses[2]).await.unwrap();
    assert!(
        eventually(
            || node_150.state.replica_get(&key) == Some("sixty".to_string()),
            Duration::from_secs(2)
        )
        .await
    );

    harness.fail_node(&addresses[1]).await;
    harness.wait_for_stabilization(30).await.unwrap();

    // Node 150 now owns (20, 150] and promoted its replica
    assert_eq!(node_150.get_predecessor().map(|p| p.id), Some(ChordId::from(20u32)));
    assert_eq!(node_150.state.primary_get(&key), Some("sixty".to_string()));
    for via in [&addresses[0], &addresses[2], &addresses[3]] {
        assert_eq!(
            harness.get(via, key.clone()).await.unwrap(),
            Some("sixty".to_string()),
            "lookup via {}",
            via
        );
    }

    let violations = NetworkInvariants::check_all(&harness).await;
    assert!(violations.is_empty(), "All invariants should hold: {:?}", violations);
}

#[tokio::test]
async fn test_replication_restored_after_failure() {
    let (harness, addresses) = four_node_ring().await;
    let key = ChordId::from(60u32);
    assert!(harness.put(&addresses[0], key.clone(), "sixty").await.unwrap());
    let node_150 = harness.get_node(&addresses[2]).await.unwrap();
    assert!(
        eventually(
            || node_150.state.replica_get(&key).is_some(),
            Duration::from_secs(2)
        )
        .await
    );

    harness.fail_node(&addresses[1]).await;
    harness.wait_for_stabilization(30).await.unwrap();
    harness.trigger_stabilization_cycles(3).await;

    // The new owner's successors are 220 and 20
    let node_220 = harness.get_node(&addresses[3]).await.unwrap();
    let node_20 = harness.get_node(&addresses[0]).await.unwrap();
    assert_eq!(node_220.state.replica_get(&key), Some("sixty".to_string()));
    assert_eq!(node_20.state.replica_get(&key), Some("sixty".to_string()));
}

#[tokio::test]
async fn test_lookups_recover_after_two_failures() {
    let (harness, addresses) = four_node_ring().await;

    harness.fail_node(&addresses[1]).await;
    harness.fail_node(&addresses[2]).await;
    harness.wait_for_stabilization(30).await.unwrap();

    let ids: Vec<ChordId> = (0u32..256).step_by(5).map(ChordId::from).collect();
    let violations = NetworkInvariants::check_lookup_agreement(&harness, &ids).await;
    assert!(violations.is_empty(), "Lookups should agree: {:?}", violations);

    let node_20 = harness.get_node(&addresses[0]).await.unwrap();
    let node_220 = harness.get_node(&addresses[3]).await.unwrap();
    assert_eq!(node_20.get_successor(), node_220.info);
    assert_eq!(node_220.get_successor(), node_20.info);
}

#[tokio::test]
async fn test_recovered_node_rejoins() {
    let (harness, addresses) = four_node_ring().await;

    harness.fail_node(&addresses[1]).await;
    harness.wait_for_stabilization(30).await.unwrap();
    harness.recover_node(&addresses[1]).await;
    harness.join_network(&addresses[1], &addresses[0]).await.unwrap();
    harness.wait_for_stabilization(30).await.unwrap();

    let node_80 = harness.get_node(&addresses[1]).await.unwrap();
    assert_eq!(node_80.get_predecessor().map(|p| p.id), Some(ChordId::from(20u32)));
    assert_eq!(node_80.get_successor().id, ChordId::from(150u32));

    let violations = NetworkInvariants::check_all(&harness).await;
    assert!(violations.is_empty(), "All invariants should hold: {:?}", violations);
}
