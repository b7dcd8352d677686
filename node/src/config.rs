use std::str::FromStr;
use std::time::Duration;

use chord_lib::{ChordId, RingSpace, MAX_RING_BITS};
use log::warn;

use crate::error::NodeError;

/// How user-facing operations and joins retry an unreachable peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_secs(5),
        }
    }
}

/// Timers for the periodic maintenance routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub period: Duration,
    pub replication_period: Duration,
    /// Offset between the first runs of consecutive routines.
    pub stagger: Duration,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            replication_period: Duration::from_secs(5),
            stagger: Duration::from_millis(200),
        }
    }
}

/// Configuration for a ChordNode
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Socket address to listen on when it differs from the advertised `host:port`.
    pub bind_address: Option<String>,
    pub ring_bits: u32,
    pub successor_list_size: usize,
    pub replication_factor: usize,
    pub bootstrap_address: Option<String>,
    pub api_address: Option<String>,
    pub rpc_workers: usize,
    pub rpc_timeout: Duration,
    pub retry: RetryPolicy,
    pub maintenance: MaintenanceSchedule,
    /// Pins the chordID instead of hashing `host:port`.
    pub node_id: Option<ChordId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            bind_address: None,
            ring_bits: 6,
            successor_list_size: 3,
            replication_factor: 1,
            bootstrap_address: None,
            api_address: None,
            rpc_workers: 10,
            rpc_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            maintenance: MaintenanceSchedule::default(),
            node_id: None,
        }
    }
}

impl Config {
    /// Builds a configuration from `CHORD_*` environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, NodeError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let millis = |name: &str, default: Duration| -> Result<Duration, NodeError> {
            Ok(parse_var::<u64, _>(&lookup, name)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let config = Config {
            host: lookup("CHORD_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "CHORD_PORT")?.unwrap_or(defaults.port),
            bind_address: lookup("CHORD_BIND_ADDRESS"),
            ring_bits: parse_var(&lookup, "CHORD_RING_BITS")?.unwrap_or(defaults.ring_bits),
            successor_list_size: parse_var(&lookup, "CHORD_SUCCESSORS")?
                .unwrap_or(defaults.successor_list_size),
            replication_factor: parse_var(&lookup, "CHORD_REPLICAS")?
                .unwrap_or(defaults.replication_factor),
            bootstrap_address: lookup("CHORD_BOOTSTRAP"),
            api_address: lookup("CHORD_API_ADDRESS"),
            rpc_workers: parse_var(&lookup, "CHORD_RPC_WORKERS")?.unwrap_or(defaults.rpc_workers),
            rpc_timeout: millis("CHORD_RPC_TIMEOUT_MS", defaults.rpc_timeout)?,
            retry: RetryPolicy {
                attempts: parse_var(&lookup, "CHORD_RETRY_ATTEMPTS")?
                    .unwrap_or(defaults.retry.attempts),
                delay: millis("CHORD_RETRY_DELAY_MS", defaults.retry.delay)?,
            },
            maintenance: MaintenanceSchedule {
                period: millis("CHORD_MAINTENANCE_PERIOD_MS", defaults.maintenance.period)?,
                replication_period: millis(
                    "CHORD_REPLICATION_PERIOD_MS",
                    defaults.maintenance.replication_period,
                )?,
                stagger: millis("CHORD_MAINTENANCE_STAGGER_MS", defaults.maintenance.stagger)?,
            },
            node_id: None,
        };
        config.validate()
    }

    /// Checks the ring parameters. A replication factor larger than the
    /// successor list is clamped rather than rejected.
    pub fn validate(mut self) -> Result<Self, NodeError> {
        if self.ring_bits == 0 || self.ring_bits > MAX_RING_BITS {
            return Err(NodeError::Config(format!(
                "ring width must be between 1 and {} bits, got {}",
                MAX_RING_BITS, self.ring_bits
            )));
        }
        if self.successor_list_size == 0 {
            return Err(NodeError::Config(
                "successor list size must be at least 1".to_string(),
            ));
        }
        if self.rpc_workers == 0 {
            return Err(NodeError::Config("rpc_workers must be at least 1".to_string()));
        }
        if self.retry.attempts == 0 {
            return Err(NodeError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.maintenance.period.is_zero() || self.maintenance.replication_period.is_zero() {
            return Err(NodeError::Config(
                "maintenance periods must be positive".to_string(),
            ));
        }
        if self.host.is_empty() || self.host.contains('@') || self.host.contains(char::is_whitespace)
        {
            return Err(NodeError::Config(format!("invalid host {:?}", self.host)));
        }
        if self.replication_factor > self.successor_list_size {
            warn!(
                "Replication factor {} exceeds successor list size {}, using {}",
                self.replication_factor, self.successor_list_size, self.successor_list_size
            );
            self.replication_factor = self.successor_list_size;
        }
        if let Some(id) = &self.node_id {
            let ring = self.ring()?;
            if !ring.contains(id) {
                return Err(NodeError::Config(format!(
                    "node id {} does not fit a {}-bit ring",
                    id, self.ring_bits
                )));
            }
        }
        Ok(self)
    }

    pub fn ring(&self) -> Result<RingSpace, NodeError> {
        RingSpace::new(self.ring_bits).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// The `host:port` peers dial to reach this node.
    pub fn advertised_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn listen_address(&self) -> String {
        self.bind_address
            .clone()
            .unwrap_or_else(|| self.advertised_address())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, NodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| NodeError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
