use log::{debug, warn};
use std::fmt;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::MaintenanceSchedule;
use crate::error::PeerUnreachable;
use crate::network_client::NetworkClient;
use crate::node::ChordNode;

/// The periodic routines that keep a node's view of the ring current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    Stabilize,
    FixFingers,
    CheckPredecessor,
    CheckSuccessor,
    FixSuccessorList,
    FixReplication,
}

impl Routine {
    pub const ALL: [Routine; 6] = [
        Routine::Stabilize,
        Routine::FixFingers,
        Routine::CheckPredecessor,
        Routine::CheckSuccessor,
        Routine::FixSuccessorList,
        Routine::FixReplication,
    ];

    pub async fn run<T: NetworkClient>(self, node: &ChordNode<T>) -> Result<(), PeerUnreachable> {
        match self {
            Routine::Stabilize => node.stabilize().await,
            Routine::FixFingers => node.fix_fingers().await,
            Routine::CheckPredecessor => node.check_predecessor().await,
            Routine::CheckSuccessor => node.check_successor().await,
            Routine::FixSuccessorList => node.fix_successor_list().await,
            Routine::FixReplication => node.fix_replication().await,
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Routine::Stabilize => "stabilize",
            Routine::FixFingers => "fix_fingers",
            Routine::CheckPredecessor => "check_predecessor",
            Routine::CheckSuccessor => "check_successor",
            Routine::FixSuccessorList => "fix_successor_list",
            Routine::FixReplication => "fix_replication",
        };
        f.write_str(name)
    }
}

/// Owns the maintenance tasks of one node.
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Starts every routine on its own timer. The first runs are staggered so
/// the routines do not all fire in the same instant.
pub fn spawn_maintenance<T: NetworkClient>(
    node: &ChordNode<T>,
    schedule: &MaintenanceSchedule,
) -> MaintenanceHandle {
    let tasks = Routine::ALL
        .iter()
        .enumerate()
        .map(|(slot, routine)| {
            let routine = *routine;
            let node = node.clone();
            let period = match routine {
                Routine::FixReplication => schedule.replication_period,
                _ => schedule.period,
            };
            let start = Instant::now() + schedule.stagger * (slot as u32 + 1);
            tokio::spawn(async move {
                let mut ticker = interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match routine.run(&node).await {
                        Ok(()) => debug!("[{}] {} done", node.info, routine),
                        Err(e) => warn!("[{}] {} skipped: {}", node.info, routine, e),
                    }
                }
            })
        })
        .collect();

    MaintenanceHandle { tasks }
}
