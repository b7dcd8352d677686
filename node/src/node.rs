use chord_lib::dht_messages::{DhtMessage, DhtResponse};
use chord_lib::snapshot::{FingerEntry, NodeSnapshot};
use chord_lib::{is_between, Address, ChordId, RingSpace};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, RetryPolicy};
use crate::error::{NodeError, PeerUnreachable};
use crate::network_client::NetworkClient;
use crate::state::{PeerState, Placement};

macro_rules! log_info {
    ($address:expr, $($arg:tt)*) => ({
        info!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($address:expr, $($arg:tt)*) => ({
        warn!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($address:expr, $($arg:tt)*) => ({
        error!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_debug {
    ($address:expr, $($arg:tt)*) => ({
        debug!("[{}] {}", $address, format_args!($($arg)*));
    })
}

fn unexpected(address: &str, response: &DhtResponse) -> PeerUnreachable {
    PeerUnreachable::new(address, format!("unexpected response {:?}", response))
}

pub struct ChordNode<T: NetworkClient> {
    pub info: Address,
    pub ring: RingSpace,
    pub replication_factor: usize,
    pub retry: RetryPolicy,
    pub state: Arc<PeerState>,
    pub network_client: Arc<T>,
    started_at: Instant,
}

impl<T: NetworkClient> Clone for ChordNode<T> {
    fn clone(&self) -> Self {
        ChordNode {
            info: self.info.clone(),
            ring: self.ring,
            replication_factor: self.replication_factor,
            retry: self.retry,
            state: self.state.clone(), // Shared, not copied
            network_client: self.network_client.clone(),
            started_at: self.started_at,
        }
    }
}

impl<T: NetworkClient> ChordNode<T> {
    pub fn new(config: &Config, network_client: Arc<T>) -> Result<Self, NodeError> {
        let config = config.clone().validate()?;
        let ring = config.ring()?;
        let id = config
            .node_id
            .clone()
            .unwrap_or_else(|| ring.node_identifier(&config.host, config.port));
        let info = Address::new(id, config.host.clone(), config.port);
        let state = Arc::new(PeerState::new(
            info.clone(),
            config.successor_list_size,
            ring.bits(),
        ));

        Ok(ChordNode {
            info,
            ring,
            replication_factor: config.replication_factor,
            retry: config.retry,
            state,
            network_client,
            started_at: Instant::now(),
        })
    }

    // Remote calls

    async fn call(&self, target: &Address, message: DhtMessage) -> Result<DhtResponse, PeerUnreachable> {
        self.network_client
            .call_node(&target.socket_address(), message)
            .await
    }

    async fn expect_ok(&self, target: &Address, message: DhtMessage) -> Result<(), PeerUnreachable> {
        match self.call(target, message).await? {
            DhtResponse::Ok => Ok(()),
            other => Err(unexpected(&target.socket_address(), &other)),
        }
    }

    async fn remote_find_successor(
        &self,
        target: &str,
        id: &ChordId,
    ) -> Result<Address, PeerUnreachable> {
        let message = DhtMessage::FindSuccessor { id: id.clone() };
        match self.network_client.call_node(target, message).await? {
            DhtResponse::Address(address) => Ok(address),
            other => Err(unexpected(target, &other)),
        }
    }

    async fn remote_successor_list(&self, target: &Address) -> Result<Vec<Address>, PeerUnreachable> {
        match self.call(target, DhtMessage::GetSuccessorList).await? {
            DhtResponse::SuccessorList(list) => Ok(list),
            other => Err(unexpected(&target.socket_address(), &other)),
        }
    }

    async fn remote_predecessor(&self, target: &Address) -> Result<Option<Address>, PeerUnreachable> {
        match self.call(target, DhtMessage::GetPredecessor).await? {
            DhtResponse::Address(address) => Ok(Some(address)),
            DhtResponse::Null => Ok(None),
            other => Err(unexpected(&target.socket_address(), &other)),
        }
    }

    async fn ping(&self, target: &Address) -> Result<(), PeerUnreachable> {
        match self.call(target, DhtMessage::Ping).await? {
            DhtResponse::Pong => Ok(()),
            other => Err(unexpected(&target.socket_address(), &other)),
        }
    }

    // Membership

    /// Forms a ring with this node as its only member.
    pub fn create(&self) {
        self.state.reset_successors(&self.info);
        self.state.set_predecessor(None);
        log_info!(self.info, "Started new network. I am the only node.");
    }

    /// Enters the ring known to `bootstrap` (`host:port`). Does not return
    /// until the join succeeds.
    pub async fn join(&self, bootstrap: &str) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.try_join(bootstrap).await {
                Ok(successor) => {
                    log_info!(
                        self.info,
                        "Joined network via {}. Successor: {}",
                        bootstrap,
                        successor
                    );
                    return;
                }
                Err(e) => {
                    log_warn!(
                        self.info,
                        "Join attempt {} via {} failed: {}. Retrying in {:?}",
                        attempt,
                        bootstrap,
                        e,
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    async fn try_join(&self, bootstrap: &str) -> Result<Address, PeerUnreachable> {
        let successor = self.remote_find_successor(bootstrap, &self.info.id).await?;
        if successor == self.info {
            // The ring already routes our id to us
            self.create();
            return Ok(successor);
        }

        let their_list = self.remote_successor_list(&successor).await?;
        self.state.splice_successors(successor.clone(), &their_list);
        self.state.set_predecessor(None);

        let transfer = DhtMessage::Transfer {
            id: self.info.id.clone(),
        };
        let entries = match self.call(&successor, transfer).await? {
            DhtResponse::Entries(entries) => entries,
            other => return Err(unexpected(&successor.socket_address(), &other)),
        };
        if !entries.is_empty() {
            log_info!(
                self.info,
                "Received {} keys from successor {}",
                entries.len(),
                successor
            );
        }
        for (key, value) in entries {
            self.store(key, value);
        }
        Ok(successor)
    }

    // Routing

    /// Resolves the node responsible for `id`, forwarding the query around
    /// the ring when neither this node nor its successor owns it.
    pub async fn find_successor(&self, id: &ChordId) -> Result<Address, PeerUnreachable> {
        if self.state.owns(id) == Some(true) {
            return Ok(self.info.clone());
        }

        let successor = self.state.successor();
        if is_between(&self.info.id, id, &successor.id, true) {
            return Ok(successor);
        }

        let next_hop = self.closest_preceding_node(id);
        if next_hop == self.info {
            return Ok(successor);
        }
        log_debug!(self.info, "Forwarding lookup of {} to {}", id, next_hop);
        self.remote_find_successor(&next_hop.socket_address(), id)
            .await
    }

    /// The farthest finger that still precedes `id`, or the successor when no
    /// finger qualifies.
    pub fn closest_preceding_node(&self, id: &ChordId) -> Address {
        self.state
            .fingers()
            .into_iter()
            .rev()
            .flatten()
            .find(|finger| *finger != self.info && is_between(&self.info.id, &finger.id, id, false))
            .unwrap_or_else(|| self.state.successor())
    }

    /// Handles a peer's claim to be our predecessor. Returns whether it was
    /// accepted.
    pub fn notify(&self, candidate: Address) -> bool {
        if candidate == self.info {
            return false;
        }
        let candidate_id = candidate.id.clone();
        let own_id = self.info.id.clone();
        let accepted = self
            .state
            .update_predecessor_if(candidate.clone(), |current| match current {
                None => true,
                Some(predecessor) => is_between(&predecessor.id, &candidate_id, &own_id, false),
            });
        if accepted {
            log_info!(self.info, "Predecessor is now {}", candidate);
        }
        accepted
    }

    // Storage

    /// Stores an entry locally, in the primary or the replica store depending
    /// on who owns it.
    pub fn store(&self, key: ChordId, value: String) -> Placement {
        let placement = self.state.store(key.clone(), value);
        log_debug!(self.info, "Stored key {} as {:?}", key, placement);
        placement
    }

    async fn with_retry<R, F, Fut>(&self, operation: &str, mut attempt: F) -> Option<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, PeerUnreachable>>,
    {
        let attempts = self.retry.attempts.max(1);
        for n in 1..=attempts {
            match attempt().await {
                Ok(result) => return Some(result),
                Err(e) => {
                    log_warn!(
                        self.info,
                        "{} attempt {}/{} failed: {}",
                        operation,
                        n,
                        attempts,
                        e
                    );
                    if n < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        log_error!(
            self.info,
            "Giving up on {} after {} attempts",
            operation,
            attempts
        );
        None
    }

    /// Stores `value` at the owner of `key`. Returns false once the retry
    /// budget is exhausted.
    pub async fn dht_put(&self, key: ChordId, value: String) -> bool {
        let operation = format!("PUT {}", key);
        self.with_retry(&operation, || self.put_once(&key, &value))
            .await
            .is_some()
    }

    async fn put_once(&self, key: &ChordId, value: &str) -> Result<(), PeerUnreachable> {
        let owner = self.find_successor(key).await?;
        if owner != self.info {
            let message = DhtMessage::Put {
                key: key.clone(),
                value: value.to_string(),
            };
            return self.expect_ok(&owner, message).await;
        }

        self.state.primary_insert(key.clone(), value.to_string());
        log_info!(self.info, "Stored key {}", key);
        // The caller may be a forwarding peer bound by its rpc_timeout, so
        // replication retries must not hold up the reply
        let node = self.clone();
        let (key, value) = (key.clone(), value.to_string());
        tokio::spawn(async move {
            node.store_replicas(&key, &value).await;
        });
        Ok(())
    }

    /// Reads `key` from its owner. Never consults replicas.
    pub async fn dht_get(&self, key: ChordId) -> Option<String> {
        let operation = format!("GET {}", key);
        self.with_retry(&operation, || self.get_once(&key))
            .await
            .flatten()
    }

    async fn get_once(&self, key: &ChordId) -> Result<Option<String>, PeerUnreachable> {
        let owner = self.find_successor(key).await?;
        if owner == self.info {
            let value = self.state.primary_get(key);
            if value.is_none() {
                log_debug!(self.info, "Key not found: {}", key);
            }
            return Ok(value);
        }

        let message = DhtMessage::Get { key: key.clone() };
        match self.call(&owner, message).await? {
            DhtResponse::Value(value) => Ok(Some(value)),
            DhtResponse::Null => Ok(None),
            other => Err(unexpected(&owner.socket_address(), &other)),
        }
    }

    /// Removes `key` from its owner's primary store. Replicas are left alone.
    pub async fn dht_delete(&self, key: ChordId) -> bool {
        let operation = format!("DELETE {}", key);
        self.with_retry(&operation, || self.delete_once(&key))
            .await
            .is_some()
    }

    async fn delete_once(&self, key: &ChordId) -> Result<(), PeerUnreachable> {
        let owner = self.find_successor(key).await?;
        if owner == self.info {
            if self.state.primary_remove(key).is_some() {
                log_info!(self.info, "Deleted key {}", key);
            }
            return Ok(());
        }
        self.expect_ok(&owner, DhtMessage::Delete { key: key.clone() })
            .await
    }

    /// The distinct peers among the first k successors, excluding this node.
    pub fn replica_targets(&self) -> Vec<Address> {
        let mut targets: Vec<Address> = Vec::new();
        for address in self
            .state
            .successor_list()
            .into_iter()
            .take(self.replication_factor)
        {
            if address != self.info && !targets.contains(&address) {
                targets.push(address);
            }
        }
        targets
    }

    /// Pushes `key` to every replica target. All targets must accept the
    /// entry for an attempt to count.
    pub async fn store_replicas(&self, key: &ChordId, value: &str) -> bool {
        let operation = format!("replication of {}", key);
        self.with_retry(&operation, || self.push_replicas(key, value))
            .await
            .is_some()
    }

    async fn push_replicas(&self, key: &ChordId, value: &str) -> Result<(), PeerUnreachable> {
        for target in self.replica_targets() {
            let message = DhtMessage::Store {
                key: key.clone(),
                value: value.to_string(),
            };
            self.expect_ok(&target, message).await?;
        }
        Ok(())
    }

    /// Hands over the entries a node joining at `id` is now responsible for.
    /// They are removed from this node.
    pub fn keys_to_transfer(&self, id: &ChordId) -> Vec<(ChordId, String)> {
        let entries = self.state.take_keys_outside(id);
        if !entries.is_empty() {
            log_info!(
                self.info,
                "Transferring {} keys to joining node {}",
                entries.len(),
                id
            );
        }
        entries
    }

    // Maintenance

    pub async fn stabilize(&self) -> Result<(), PeerUnreachable> {
        let successor = self.state.successor();
        let candidate = if successor == self.info {
            self.state.predecessor()
        } else {
            self.remote_predecessor(&successor).await?
        };

        let mut new_successor = successor.clone();
        if let Some(candidate) = candidate {
            if candidate != self.info && is_between(&self.info.id, &candidate.id, &successor.id, false) {
                new_successor = candidate;
                self.state.set_successor(0, new_successor.clone());
                log_info!(self.info, "Successor changed to {}", new_successor);
            }
        }

        if new_successor == self.info {
            return Ok(());
        }

        let their_list = self.remote_successor_list(&new_successor).await?;
        self.state.splice_successors(new_successor.clone(), &their_list);
        self.expect_ok(
            &new_successor,
            DhtMessage::Notify {
                address: self.info.clone(),
            },
        )
        .await
    }

    /// Refreshes one finger per call, cycling through the table.
    pub async fn fix_fingers(&self) -> Result<(), PeerUnreachable> {
        let index = self.state.advance_finger();
        let start = self.ring.finger_start(&self.info.id, index as u32);
        match self.find_successor(&start).await {
            Ok(node) => {
                self.state.set_finger(index, Some(node));
                Ok(())
            }
            Err(e) => {
                self.state.set_finger(index, None);
                Err(e)
            }
        }
    }

    pub async fn check_predecessor(&self) -> Result<(), PeerUnreachable> {
        let Some(predecessor) = self.state.predecessor() else {
            return Ok(());
        };
        if let Err(e) = self.ping(&predecessor).await {
            if self.state.clear_predecessor_if(&predecessor) {
                log_warn!(self.info, "Predecessor {} is dead. Cleared. ({})", predecessor, e);
            }
        }
        Ok(())
    }

    pub async fn check_successor(&self) -> Result<(), PeerUnreachable> {
        let successor = self.state.successor();
        if successor == self.info {
            return Ok(());
        }
        if let Err(e) = self.ping(&successor).await {
            match self.state.promote_next_successor(&successor) {
                Some(next) => log_warn!(
                    self.info,
                    "Successor {} is dead ({}). Promoted {}",
                    successor,
                    e,
                    next
                ),
                None => log_warn!(
                    self.info,
                    "Successor {} is dead ({}) and there is no other to promote",
                    successor,
                    e
                ),
            }
        }
        Ok(())
    }

    pub async fn fix_successor_list(&self) -> Result<(), PeerUnreachable> {
        let successor = self.state.successor();
        if successor == self.info {
            return Ok(());
        }
        let their_list = self.remote_successor_list(&successor).await?;
        self.state.splice_successors(successor, &their_list);
        Ok(())
    }

    /// Re-applies the placement rule and, when the successor list changed
    /// since the last run, pushes every stored entry to the replicas again.
    pub async fn fix_replication(&self) -> Result<(), PeerUnreachable> {
        let moved = self.state.rebalance();
        if moved > 0 {
            log_debug!(self.info, "Moved {} entries between primary and replica", moved);
        }

        if !self.state.successor_list_changed() {
            return Ok(());
        }

        let mut entries = self.state.primary_entries();
        entries.extend(self.state.replica_entries());
        if entries.is_empty() {
            return Ok(());
        }
        log_info!(
            self.info,
            "Successor list changed, re-replicating {} entries",
            entries.len()
        );

        let mut failed = 0usize;
        for (key, value) in &entries {
            if !self.store_replicas(key, value).await {
                failed += 1;
            }
        }
        if failed > 0 {
            // Try again on the next run
            self.state.forget_successor_digest();
            log_error!(self.info, "Re-replication failed for {} entries", failed);
        }
        Ok(())
    }

    // Request handling

    /// Serves one decoded request.
    pub async fn handle_request(&self, message: DhtMessage) -> DhtResponse {
        match message {
            DhtMessage::Put { key, value } => {
                self.dht_put(key, value).await;
                DhtResponse::Ok
            }
            DhtMessage::Get { key } => match self.dht_get(key).await {
                Some(value) => DhtResponse::Value(value),
                None => DhtResponse::Null,
            },
            DhtMessage::Delete { key } => {
                self.dht_delete(key).await;
                DhtResponse::Ok
            }
            DhtMessage::Store { key, value } => {
                self.store(key, value);
                DhtResponse::Ok
            }
            DhtMessage::Transfer { id } => DhtResponse::Entries(self.keys_to_transfer(&id)),
            DhtMessage::FindSuccessor { id } => match self.find_successor(&id).await {
                Ok(address) => DhtResponse::Address(address),
                Err(e) => {
                    log_warn!(self.info, "Lookup of {} failed: {}", id, e);
                    DhtResponse::Error
                }
            },
            DhtMessage::GetSuccessorList => DhtResponse::SuccessorList(self.state.successor_list()),
            DhtMessage::GetPredecessor => match self.state.predecessor() {
                Some(predecessor) => DhtResponse::Address(predecessor),
                None => DhtResponse::Null,
            },
            DhtMessage::Notify { address } => {
                self.notify(address);
                DhtResponse::Ok
            }
            DhtMessage::Ping => DhtResponse::Pong,
        }
    }

    /// Decodes a request line, serves it and renders the response line.
    /// Anything that does not decode yields `ERROR`.
    pub async fn handle_line(&self, line: &str) -> String {
        let request = line
            .parse::<DhtMessage>()
            .and_then(|message| message.check_ring(&self.ring).map(|()| message));
        match request {
            Ok(message) => {
                log_debug!(self.info, "Received message: {}", message);
                let response = self.handle_request(message).await;
                log_debug!(self.info, "Responding: {}", response);
                response.to_string()
            }
            Err(e) => {
                log_warn!(self.info, "Rejected request {:?}: {}", line.trim(), e);
                DhtResponse::Error.to_string()
            }
        }
    }

    // Introspection

    pub fn get_successor(&self) -> Address {
        self.state.successor()
    }

    pub fn get_predecessor(&self) -> Option<Address> {
        self.state.predecessor()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let fingers = self
            .state
            .fingers()
            .into_iter()
            .enumerate()
            .map(|(index, node)| FingerEntry {
                start: self.ring.finger_start(&self.info.id, index as u32).to_string(),
                node: node.map(|address| address.to_string()),
            })
            .collect();
        let ids = |entries: Vec<(ChordId, String)>| {
            entries
                .into_iter()
                .map(|(id, _)| id.to_string())
                .collect::<Vec<String>>()
        };

        NodeSnapshot {
            address: self.info.to_string(),
            predecessor: self.state.predecessor().map(|p| p.to_string()),
            successor_list: self
                .state
                .successor_list()
                .iter()
                .map(Address::to_string)
                .collect(),
            fingers,
            primary_keys: ids(self.state.primary_entries()),
            replica_keys: ids(self.state.replica_entries()),
            uptime: self.started_at.elapsed(),
        }
    }
}
