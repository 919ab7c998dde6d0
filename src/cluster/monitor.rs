use anyhow::Result;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::{
    ClusterMessage, Epoch, LeadershipState, PeerHealth, PeerStatus, ReplicaId, ReplicaRole,
};
use crate::config::{ClusterConfig, ReplicaSpec};

/// Tracks which replica is primary and drives failover.
///
/// Each replica runs one monitor. It broadcasts its own role and epoch to the
/// static peer list, counts missed heartbeats from everyone else, and applies
/// two precedence rules when primaries collide:
///
/// 1. a higher epoch always wins (a deposed primary that re-appears with a
///    stale epoch demotes itself),
/// 2. at equal epochs, the lower ordinal wins (resolves the race where two
///    backups promote simultaneously).
///
/// Leadership changes are published on a watch channel; the store and the
/// dispatcher react to it, the monitor itself knows nothing about tasks.
pub struct HealthMonitor {
    config: Arc<ClusterConfig>,
    local: ReplicaSpec,
    ordinal: usize,
    socket: Arc<UdpSocket>,
    pub peers: DashMap<ReplicaId, PeerStatus>,
    state_tx: watch::Sender<LeadershipState>,
    max_epoch: AtomicU64,
    queue_depth: AtomicUsize,
    started_at: Instant,
}

impl HealthMonitor {
    /// Binds the replica's heartbeat socket and seeds the peer table.
    ///
    /// Nobody claims leadership at boot. Ordinal 0 starts as Backup at epoch
    /// 0 with no believed primary: if a live primary holds a higher epoch
    /// (ordinal 0 restarting into its own failed-over cluster), its
    /// heartbeats arrive within one liveness budget and are adopted before
    /// this replica promotes itself. Everyone else starts as Backup believing
    /// ordinal 0 leads. Peers are seeded Alive so a replica that never shows
    /// up still has to exhaust the missed-heartbeat budget before anyone
    /// fails over past it.
    pub async fn new(config: Arc<ClusterConfig>, ordinal: usize) -> Result<Arc<Self>> {
        let local = config
            .replicas
            .get(ordinal)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no replica configured at ordinal {}", ordinal))?;

        let socket = UdpSocket::bind(local.heartbeat_addr).await?;

        let initial = if ordinal == 0 {
            LeadershipState {
                role: ReplicaRole::Backup,
                epoch: 0,
                primary: None,
            }
        } else {
            LeadershipState {
                role: ReplicaRole::Backup,
                epoch: 1,
                primary: Some(config.replicas[0].id.clone()),
            }
        };

        let peers = DashMap::new();
        for replica in config.replicas.iter() {
            if replica.id == local.id {
                continue;
            }
            peers.insert(
                replica.id.clone(),
                PeerStatus {
                    role: ReplicaRole::Backup,
                    epoch: 0,
                    health: PeerHealth::Alive,
                    last_seen: Instant::now(),
                    missed: 0,
                },
            );
        }

        let max_epoch = AtomicU64::new(initial.epoch);
        let (state_tx, _) = watch::channel(initial);

        Ok(Arc::new(Self {
            config,
            local,
            ordinal,
            socket: Arc::new(socket),
            peers,
            state_tx,
            max_epoch,
            queue_depth: AtomicUsize::new(0),
            started_at: Instant::now(),
        }))
    }

    pub fn state(&self) -> LeadershipState {
        self.state_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<LeadershipState> {
        self.state_tx.subscribe()
    }

    pub fn local_id(&self) -> &ReplicaId {
        &self.local.id
    }

    pub fn max_observed_epoch(&self) -> Epoch {
        self.max_epoch.load(Ordering::SeqCst)
    }

    /// Records an epoch seen outside the heartbeat channel, e.g. on the
    /// replication endpoint. Keeps zombie rejection consistent across both.
    pub fn observe_epoch(&self, epoch: Epoch) {
        self.max_epoch.fetch_max(epoch, Ordering::SeqCst);
    }

    /// Fed by the replica runtime so heartbeats advertise backlog size.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Replicas (self included) not yet declared dead.
    pub fn alive_replicas(&self) -> Vec<ReplicaId> {
        let mut alive = vec![self.local.id.clone()];
        for entry in self.peers.iter() {
            if entry.value().health != PeerHealth::Dead {
                alive.push(entry.key().clone());
            }
        }
        alive
    }

    /// HTTP address of the believed primary, for client redirection and
    /// follower state sync.
    pub fn primary_http_addr(&self) -> Option<String> {
        let state = self.state();
        let primary = state.primary?;
        self.config
            .replica(&primary)
            .map(|spec| spec.http_addr.to_string())
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting health monitor for {} (ordinal {})",
            self.local.id, self.ordinal
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.broadcast_loop().await;
        });

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.receive_loop().await;
        });

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.failure_detection_loop().await;
        });
    }

    async fn broadcast_loop(self: Arc<Self>) {
        loop {
            self.send_heartbeats().await;

            // Jitter avoids synchronized heartbeat bursts across replicas.
            let jitter = rand::thread_rng().gen_range(0..50);
            tokio::time::sleep(self.config.heartbeat_interval + Duration::from_millis(jitter))
                .await;
        }
    }

    async fn send_heartbeats(&self) {
        let state = self.state();
        let message = ClusterMessage::Heartbeat {
            from: self.local.id.clone(),
            ordinal: self.ordinal,
            role: state.role,
            epoch: state.epoch,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        };

        let Ok(encoded) = bincode::serialize(&message) else {
            warn!("Failed to serialize heartbeat");
            return;
        };

        for replica in self.config.replicas.iter() {
            if replica.id == self.local.id {
                continue;
            }
            if let Err(e) = self.socket.send_to(&encoded, replica.heartbeat_addr).await {
                debug!("Failed to send heartbeat to {}: {}", replica.id, e);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 4096];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<ClusterMessage>(&buf[..len]) {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => debug!("Undecodable heartbeat from {}: {}", src, e),
                },
                Err(e) => {
                    warn!("Heartbeat socket receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, message: ClusterMessage) {
        match message {
            ClusterMessage::Heartbeat {
                from,
                ordinal,
                role,
                epoch,
                ..
            } => {
                if from == self.local.id {
                    return;
                }
                self.max_epoch.fetch_max(epoch, Ordering::SeqCst);
                self.peers.insert(
                    from.clone(),
                    PeerStatus {
                        role,
                        epoch,
                        health: PeerHealth::Alive,
                        last_seen: Instant::now(),
                        missed: 0,
                    },
                );

                if role == ReplicaRole::Primary {
                    self.observe_primary_claim(from, ordinal, epoch);
                }
            }
            ClusterMessage::StepDown { from, epoch } => {
                info!("Replica {} announced step-down", from);
                self.max_epoch.fetch_max(epoch, Ordering::SeqCst);
                if let Some(mut peer) = self.peers.get_mut(&from) {
                    peer.health = PeerHealth::Dead;
                    peer.missed = self.config.max_missed_heartbeats;
                }
                let state = self.state();
                if state.primary.as_ref() == Some(&from) {
                    self.state_tx.send_replace(LeadershipState {
                        primary: None,
                        ..state
                    });
                    // Do not wait for the next sweep.
                    self.failure_check();
                }
            }
        }
    }

    /// Applies the epoch/ordinal precedence rules to a peer claiming Primary.
    pub(crate) fn observe_primary_claim(&self, from: ReplicaId, ordinal: usize, epoch: Epoch) {
        let state = self.state();

        if epoch > state.epoch {
            if state.is_primary() {
                warn!(
                    "Deposed by {} (epoch {} > {}), stepping down",
                    from, epoch, state.epoch
                );
            } else if state.primary.as_ref() != Some(&from) {
                info!("Adopting {} as primary (epoch {})", from, epoch);
            }
            self.state_tx.send_replace(LeadershipState {
                role: ReplicaRole::Backup,
                epoch,
                primary: Some(from),
            });
            return;
        }

        if state.is_primary() {
            if ordinal < self.ordinal && epoch >= state.epoch {
                // Same-epoch split brain: ordinal order decides, lowest wins.
                warn!(
                    "Higher-priority replica {} claims leadership, stepping down",
                    from
                );
                self.state_tx.send_replace(LeadershipState {
                    role: ReplicaRole::Backup,
                    epoch,
                    primary: Some(from),
                });
            } else {
                debug!(
                    "Ignoring stale primary claim from {} (epoch {}, ours {})",
                    from, epoch, state.epoch
                );
            }
            return;
        }

        if epoch == state.epoch && state.primary.as_ref() != Some(&from) {
            info!("Adopting {} as primary (epoch {})", from, epoch);
            self.state_tx.send_replace(LeadershipState {
                role: ReplicaRole::Backup,
                epoch,
                primary: Some(from),
            });
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            interval.tick().await;
            if self.failure_check() {
                // Announce the new term before the next scheduled beat.
                self.send_heartbeats().await;
            }
        }
    }

    /// One failure-detection sweep. Returns true if this replica promoted
    /// itself.
    pub(crate) fn failure_check(&self) -> bool {
        let now = Instant::now();

        for mut entry in self.peers.iter_mut() {
            let id = entry.key().clone();
            let peer = entry.value_mut();
            if now.duration_since(peer.last_seen) <= self.config.heartbeat_interval {
                continue;
            }

            peer.missed += 1;
            if peer.missed >= self.config.max_missed_heartbeats {
                if peer.health != PeerHealth::Dead {
                    warn!(
                        "Replica {} declared dead after {} missed heartbeats",
                        id, peer.missed
                    );
                }
                peer.health = PeerHealth::Dead;
            } else {
                if peer.health == PeerHealth::Alive {
                    debug!(
                        "Replica {} missed heartbeat {}/{}",
                        id, peer.missed, self.config.max_missed_heartbeats
                    );
                }
                peer.health = PeerHealth::Suspected;
            }
        }

        let state = self.state();
        if state.is_primary() {
            return false;
        }

        let primary_alive = match &state.primary {
            Some(primary) => self
                .peers
                .get(primary)
                .map(|p| p.health != PeerHealth::Dead)
                .unwrap_or(false),
            None => false,
        };
        if primary_alive {
            return false;
        }

        // The primary is gone. Promote only if no surviving replica outranks
        // us; otherwise hold and let it take over.
        let outranked = self.peers.iter().any(|entry| {
            entry.value().health != PeerHealth::Dead
                && self
                    .config
                    .ordinal_of(entry.key())
                    .map(|o| o < self.ordinal)
                    .unwrap_or(false)
        });
        if outranked {
            debug!("Primary lost but a higher-priority replica survives, holding");
            return false;
        }

        // Epoch 0 means this replica has never seen a term: it is booting.
        // Hold for one full liveness budget so an incumbent primary can
        // assert itself before we claim the cluster.
        if state.epoch == 0
            && self.started_at.elapsed()
                < self.config.heartbeat_interval * self.config.max_missed_heartbeats
        {
            debug!("Booting, deferring first leadership claim");
            return false;
        }

        self.promote();
        true
    }

    pub(crate) fn promote(&self) {
        let epoch = self.max_epoch.load(Ordering::SeqCst) + 1;
        self.max_epoch.fetch_max(epoch, Ordering::SeqCst);

        info!(
            "Promoting {} to primary (epoch {})",
            self.local.id, epoch
        );
        self.state_tx.send_replace(LeadershipState {
            role: ReplicaRole::Primary,
            epoch,
            primary: Some(self.local.id.clone()),
        });
    }

    /// Clean shutdown: relinquish leadership and tell peers immediately so
    /// they do not have to wait out the missed-heartbeat budget.
    pub async fn step_down(&self) {
        let state = self.state();
        if state.is_primary() {
            info!("Stepping down from primary (epoch {})", state.epoch);
            self.state_tx.send_replace(LeadershipState {
                role: ReplicaRole::Backup,
                epoch: state.epoch,
                primary: None,
            });
        }

        let message = ClusterMessage::StepDown {
            from: self.local.id.clone(),
            epoch: state.epoch,
        };
        if let Ok(encoded) = bincode::serialize(&message) {
            for replica in self.config.replicas.iter() {
                if replica.id == self.local.id {
                    continue;
                }
                let _ = self.socket.send_to(&encoded, replica.heartbeat_addr).await;
            }
        }
    }
}
