//! Chord DHT Node Library
//!
//! This library provides a single peer of a Chord ring: routing, membership,
//! replicated key/value storage and the periodic maintenance that keeps them
//! consistent under churn. It can be used both by the `chord-node` binary and
//! as a library for integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod network_client;
pub mod node;
pub mod scheduler;
pub mod server;
pub mod state;

// Re-export main types for public API
pub use config::{Config, MaintenanceSchedule, RetryPolicy};
pub use error::{NodeError, PeerUnreachable};
pub use network_client::{NetworkClient, RealNetworkClient};
pub use node::ChordNode;
pub use scheduler::{spawn_maintenance, MaintenanceHandle, Routine};
pub use state::{PeerState, Placement};

// Re-export from lib crate for convenience
pub use chord_lib::dht_messages::{DhtMessage, DhtResponse};
pub use chord_lib::snapshot::NodeSnapshot;
pub use chord_lib::{Address, ChordId, RingSpace};

impl ChordNode<RealNetworkClient> {
    /// Create a ChordNode from config with the real network client
    pub fn from_config(config: &Config) -> Result<Self, NodeError> {
        let client = RealNetworkClient::with_timeout(config.rpc_timeout);
        ChordNode::new(config, std::sync::Arc::new(client))
    }
}

impl<T: NetworkClient> ChordNode<T> {
    /// Join an existing network or create a new one
    pub async fn join_network(&self, bootstrap_address: Option<&str>) {
        match bootstrap_address {
            Some(address) => self.join(address).await,
            None => self.create(),
        }
    }
}
