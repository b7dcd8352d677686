use std::io;

use thiserror::Error;

/// The only failure the RPC client reports: the peer could not be reached,
/// did not answer in time, or answered with something unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer {address} unreachable: {reason}")]
pub struct PeerUnreachable {
    pub address: String,
    pub reason: String,
}

impl PeerUnreachable {
    pub fn new(address: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures that stop a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("introspection API failed: {0}")]
    Api(String),
}
