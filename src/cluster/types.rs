use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReplicaId(pub String);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Leadership term counter. Bumped on every promotion; messages carrying an
/// epoch below the highest one observed are stale and must be ignored.
pub type Epoch = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Primary,
    Backup,
}

/// What a replica currently believes about leadership. Published on a watch
/// channel so the store, dispatcher, and API all read one consistent view.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadershipState {
    pub role: ReplicaRole,
    pub epoch: Epoch,
    pub primary: Option<ReplicaId>,
}

impl LeadershipState {
    pub fn is_primary(&self) -> bool {
        self.role == ReplicaRole::Primary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    Alive,
    Suspected,
    Dead,
}

/// Last known condition of one peer replica, maintained by the monitor.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub role: ReplicaRole,
    pub epoch: Epoch,
    pub health: PeerHealth,
    pub last_seen: Instant,
    pub missed: u32,
}

/// The UDP wire protocol between replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterMessage {
    Heartbeat {
        from: ReplicaId,
        ordinal: usize,
        role: ReplicaRole,
        epoch: Epoch,
        queue_depth: usize,
    },
    /// Clean shutdown announcement so peers fail over without waiting out the
    /// missed-heartbeat budget.
    StepDown { from: ReplicaId, epoch: Epoch },
}
