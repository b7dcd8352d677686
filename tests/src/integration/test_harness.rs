use crate::integration::{NetworkSimulator, SimulatedNetworkClient, SimulatorMessage};
use chord_lib::{Address, ChordId};
use chord_node::{ChordNode, Config, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

pub type TestError = Box<dyn std::error::Error + Send + Sync>;

pub type SimulatedNode = Arc<ChordNode<SimulatedNetworkClient>>;

/// Main test harness that orchestrates multi-node DHT network tests
pub struct TestHarness {
    /// Simulated network for message routing
    network: NetworkSimulator,
    /// Settings every added node starts from
    template: Config,
    /// Running node instances
    nodes: Arc<RwLock<HashMap<String, TestNode>>>,
}

struct TestNode {
    /// The actual ChordNode instance (production code)
    chord_node: SimulatedNode,
    /// Handle to the node's message processing task
    task_handle: JoinHandle<()>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// A harness for 8-bit rings with r = 3, k = 2 and a short retry budget
    pub fn new() -> Self {
        Self::with_config(Config {
            ring_bits: 8,
            successor_list_size: 3,
            replication_factor: 2,
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(10),
            },
            ..Config::default()
        })
    }

    pub fn with_config(template: Config) -> Self {
        Self {
            network: NetworkSimulator::new(),
            template,
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a new node with a pinned chordID and start serving its messages
    pub async fn add_node(&self, node_id: u32, port: u16) -> Result<String, TestError> {
        let config = Config {
            port,
            node_id: Some(ChordId::from(node_id)),
            ..self.template.clone()
        };
        let address = config.advertised_address();

        let (tx, rx) = mpsc::unbounded_channel();
        self.network.register_node(address.clone(), tx).await;

        let network_client = self.network.create_client(address.clone());
        let chord_node = Arc::new(ChordNode::new(&config, Arc::new(network_client))?);
        let task_handle = tokio::spawn(Self::serve(chord_node.clone(), rx));

        self.nodes.write().await.insert(
            address.clone(),
            TestNode {
                chord_node,
                task_handle,
            },
        );
        Ok(address)
    }

    // Each request runs on its own task so a node can be called back while
    // it is waiting on another peer.
    async fn serve(node: SimulatedNode, mut receiver: mpsc::UnboundedReceiver<SimulatorMessage>) {
        while let Some(request) = receiver.recv().await {
            let node = node.clone();
            tokio::spawn(async move {
                let response = node.handle_request(request.message).await;
                let _ = request.response_sender.send(response);
            });
        }
    }

    /// Make the node the first member of a new ring
    pub async fn create_network(&self, node_address: &str) -> Result<(), TestError> {
        let node = self.node(node_address).await?;
        node.create();
        Ok(())
    }

    /// Join a node through a bootstrap member
    pub async fn join_network(&self, node_address: &str, bootstrap: &str) -> Result<(), TestError> {
        let node = self.node(node_address).await?;
        tokio::time::timeout(Duration::from_secs(10), node.join(bootstrap))
            .await
            .map_err(|_| format!("{} could not join via {}", node_address, bootstrap))?;
        Ok(())
    }

    /// Simulate node failure
    pub async fn fail_node(&self, address: &str) {
        self.network.mark_node_failed(address).await;
    }

    /// Simulate node recovery
    pub async fn recover_node(&self, address: &str) {
        self.network.mark_node_recovered(address).await;
    }

    /// Get node by address
    pub async fn get_node(&self, address: &str) -> Option<SimulatedNode> {
        let nodes = self.nodes.read().await;
        nodes.get(address).map(|n| n.chord_node.clone())
    }

    async fn node(&self, address: &str) -> Result<SimulatedNode, TestError> {
        self.get_node(address)
            .await
            .ok_or_else(|| format!("Node {} not found", address).into())
    }

    /// Nodes that have not been failed, in ring order
    pub async fn live_nodes(&self) -> Vec<SimulatedNode> {
        let candidates: Vec<SimulatedNode> = self
            .nodes
            .read()
            .await
            .values()
            .map(|n| n.chord_node.clone())
            .collect();

        let mut live = Vec::new();
        for node in candidates {
            if !self.network.is_node_failed(&node.info.socket_address()).await {
                live.push(node);
            }
        }
        live.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        live
    }

    /// The live node whose (predecessor, self] interval contains `id`
    pub async fn expected_owner(&self, id: &ChordId) -> Option<Address> {
        let live = self.live_nodes().await;
        live.iter()
            .find(|node| node.info.id >= *id)
            .or_else(|| live.first())
            .map(|node| node.info.clone())
    }

    /// Run every maintenance routine once on every live node
    pub async fn trigger_stabilization_round(&self) {
        for node in self.live_nodes().await {
            let _ = node.check_predecessor().await;
            let _ = node.check_successor().await;
            let _ = node.stabilize().await;
            let _ = node.fix_successor_list().await;
            for _ in 0..node.ring.bits() {
                let _ = node.fix_fingers().await;
            }
            let _ = node.fix_replication().await;
        }
    }

    /// Trigger multiple rounds of stabilization
    pub async fn trigger_stabilization_cycles(&self, rounds: u32) {
        for _ in 0..rounds {
            self.trigger_stabilization_round().await;
        }
    }

    /// Run rounds until every live node's successor and predecessor match
    /// the ring order, then one more round so fingers and replicas settle
    pub async fn wait_for_stabilization(&self, max_rounds: u32) -> Result<u32, TestError> {
        for round in 1..=max_rounds {
            self.trigger_stabilization_round().await;
            if self.ring_is_ordered().await {
                self.trigger_stabilization_round().await;
                return Ok(round);
            }
        }
        Err(format!("ring did not stabilize within {} rounds", max_rounds).into())
    }

    async fn ring_is_ordered(&self) -> bool {
        let live = self.live_nodes().await;
        let count = live.len();
        if count == 0 {
            return true;
        }
        live.iter().enumerate().all(|(i, node)| {
            let next = &live[(i + 1) % count];
            let previous = &live[(i + count - 1) % count];
            let predecessor_ok = if count == 1 {
                node.get_predecessor().is_none()
            } else {
                node.get_predecessor().as_ref() == Some(&previous.info)
            };
            node.get_successor() == next.info && predecessor_ok
        })
    }

    /// Store data through a specific node
    pub async fn put(&self, via: &str, key: ChordId, value: &str) -> Result<bool, TestError> {
        let node = self.node(via).await?;
        Ok(node.dht_put(key, value.to_string()).await)
    }

    /// Retrieve data through a specific node
    pub async fn get(&self, via: &str, key: ChordId) -> Result<Option<String>, TestError> {
        let node = self.node(via).await?;
        Ok(node.dht_get(key).await)
    }

    pub async fn delete(&self, via: &str, key: ChordId) -> Result<bool, TestError> {
        let node = self.node(via).await?;
        Ok(node.dht_delete(key).await)
    }

    /// Access the network simulator for advanced control
    pub fn network(&self) -> &NetworkSimulator {
        &self.network
    }
}

/// Polls `condition` until it holds or `within` runs out. Replication is
/// pushed in the background, so replica checks go through here.
pub async fn eventually<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Ok(nodes) = self.nodes.try_read() {
            for node in nodes.values() {
                node.task_handle.abort();
            }
        }
    }
}
