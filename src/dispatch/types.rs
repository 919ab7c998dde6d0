use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Stable worker identity from the static topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkerId(pub String);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What the primary knows about one worker. Rebuilt from scratch after every
/// failover; workers re-introduce themselves on their next poll or heartbeat.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub last_seen: Instant,
    pub current_task: Option<crate::store::types::TaskId>,
    pub completed: u64,
    pub failed: u64,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            current_task: None,
            completed: 0,
            failed: 0,
        }
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}
