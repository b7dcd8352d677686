use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One row of a node's finger table as reported by the introspection API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FingerEntry {
    /// First identifier this finger is responsible for.
    pub start: String,

    /// The node currently believed to succeed `start`, if known.
    pub node: Option<String>,
}

/// Point-in-time view of a node's routing and storage state.
///
/// Identifiers and addresses are kept in their wire text form so the
/// snapshot can describe rings of any width.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub address: String,
    pub predecessor: Option<String>,
    pub successor_list: Vec<String>,
    pub fingers: Vec<FingerEntry>,

    /// Identifiers of the keys this node is primarily responsible for.
    pub primary_keys: Vec<String>,

    /// Identifiers of the keys held on behalf of predecessors.
    pub replica_keys: Vec<String>,

    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}
