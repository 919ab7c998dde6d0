//! Static deployment topology and tunables.
//!
//! The replica set and the worker identity list are fixed at startup: moving a
//! replica to another host is a configuration change, not a protocol change.
//! The position of a replica in `replicas` is its election ordinal -- index 0
//! has the highest leadership priority.
//!
//! Every value can be overridden through `NEWSMESH_*` environment variables;
//! defaults describe a three-replica, three-worker localhost deployment.

use crate::cluster::types::ReplicaId;
use crate::dispatch::types::WorkerId;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Network identity of one replica: where it exchanges heartbeats (UDP) and
/// where it serves HTTP (clients, workers, replication).
#[derive(Debug, Clone)]
pub struct ReplicaSpec {
    pub id: ReplicaId,
    pub heartbeat_addr: SocketAddr,
    pub http_addr: SocketAddr,
}

/// Whether a mutation is pushed to backups before or after the client ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    Sync,
    Async,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Replicas in priority order; index is the election ordinal.
    pub replicas: Vec<ReplicaSpec>,
    /// Worker identities allowed to register. Registration by any other id is
    /// rejected.
    pub workers: Vec<WorkerId>,
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a replica or worker is declared
    /// dead. A single miss only marks it suspected.
    pub max_missed_heartbeats: u32,
    /// Failed or lost attempts a task is allowed before it terminates Failed.
    pub max_attempts: u32,
    /// Hard ceiling on a single executor invocation inside a worker.
    pub executor_timeout: Duration,
    /// An assignment older than this is considered stalled and requeued even
    /// if its worker still heartbeats.
    pub assignment_stall_timeout: Duration,
    pub replication: ReplicationMode,
    /// Interval at which a backup pulls a full snapshot from the primary.
    pub sync_interval: Duration,
}

impl ClusterConfig {
    pub fn from_env() -> Result<Self> {
        let replicas = match std::env::var("NEWSMESH_REPLICAS") {
            Ok(raw) => parse_replica_list(&raw)?,
            Err(_) => default_replicas(),
        };

        let workers = match std::env::var("NEWSMESH_WORKERS") {
            Ok(raw) => raw
                .split(',')
                .map(|w| WorkerId(w.trim().to_string()))
                .filter(|w| !w.0.is_empty())
                .collect(),
            Err(_) => default_workers(),
        };

        Ok(Self {
            replicas,
            workers,
            heartbeat_interval: env_duration_ms("NEWSMESH_HEARTBEAT_INTERVAL_MS", 1_000),
            max_missed_heartbeats: env_u32("NEWSMESH_MAX_MISSED_HEARTBEATS", 3),
            max_attempts: env_u32("NEWSMESH_MAX_ATTEMPTS", 3),
            executor_timeout: env_duration_ms("NEWSMESH_EXECUTOR_TIMEOUT_MS", 60_000),
            assignment_stall_timeout: env_duration_ms("NEWSMESH_STALL_TIMEOUT_MS", 60_000),
            replication: match std::env::var("NEWSMESH_REPLICATION").as_deref() {
                Ok("sync") => ReplicationMode::Sync,
                _ => ReplicationMode::Async,
            },
            sync_interval: env_duration_ms("NEWSMESH_SYNC_INTERVAL_MS", 5_000),
        })
    }

    pub fn replica(&self, id: &ReplicaId) -> Option<&ReplicaSpec> {
        self.replicas.iter().find(|r| &r.id == id)
    }

    /// Election priority of a replica: lower is higher priority.
    pub fn ordinal_of(&self, id: &ReplicaId) -> Option<usize> {
        self.replicas.iter().position(|r| &r.id == id)
    }

    pub fn is_known_worker(&self, id: &WorkerId) -> bool {
        self.workers.iter().any(|w| w == id)
    }
}

/// Parses `id@heartbeat_addr@http_addr` entries separated by commas.
pub fn parse_replica_list(raw: &str) -> Result<Vec<ReplicaSpec>> {
    let mut replicas = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut parts = entry.split('@');
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("replica entry missing id: {}", entry))?;
        let heartbeat_addr: SocketAddr = parts
            .next()
            .with_context(|| format!("replica entry missing heartbeat addr: {}", entry))?
            .parse()
            .with_context(|| format!("bad heartbeat addr in entry: {}", entry))?;
        let http_addr: SocketAddr = parts
            .next()
            .with_context(|| format!("replica entry missing http addr: {}", entry))?
            .parse()
            .with_context(|| format!("bad http addr in entry: {}", entry))?;

        replicas.push(ReplicaSpec {
            id: ReplicaId(id.to_string()),
            heartbeat_addr,
            http_addr,
        });
    }

    if replicas.is_empty() {
        anyhow::bail!("NEWSMESH_REPLICAS contained no replica entries");
    }

    Ok(replicas)
}

fn default_replicas() -> Vec<ReplicaSpec> {
    (0..3)
        .map(|i| ReplicaSpec {
            id: ReplicaId(format!("replica-{}", i)),
            heartbeat_addr: format!("127.0.0.1:{}", 7100 + i).parse().unwrap(),
            http_addr: format!("127.0.0.1:{}", 8100 + i).parse().unwrap(),
        })
        .collect()
}

fn default_workers() -> Vec<WorkerId> {
    (1..=3).map(|i| WorkerId(format!("worker-{}", i))).collect()
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_ms(key: &str, default: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}
