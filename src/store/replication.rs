use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::protocol::{ReplicateRequest, ReplicateResponse, ENDPOINT_REPLICATE, ENDPOINT_SNAPSHOT};
use super::store::TaskStore;
use super::types::TaskRecord;
use crate::cluster::monitor::HealthMonitor;
use crate::config::{ClusterConfig, ReplicationMode};

const REPLICATE_TIMEOUT: Duration = Duration::from_secs(2);
const REPLICATE_ATTEMPTS: usize = 3;
const CHANNEL_CAPACITY: usize = 1024;

/// Pushes committed records from the primary to every backup.
///
/// In Sync mode the caller waits for the fan-out; in Async mode records are
/// handed to a background drain task and the caller returns immediately. A
/// backup that was unreachable catches up through the periodic snapshot pull
/// in [`Replicator::follower_sync_loop`].
pub struct Replicator {
    config: Arc<ClusterConfig>,
    monitor: Arc<HealthMonitor>,
    http_client: reqwest::Client,
    tx: mpsc::Sender<TaskRecord>,
    rx: Mutex<Option<mpsc::Receiver<TaskRecord>>>,
}

impl Replicator {
    pub fn new(config: Arc<ClusterConfig>, monitor: Arc<HealthMonitor>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        Arc::new(Self {
            config,
            monitor,
            http_client: reqwest::Client::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Spawns the drain loop and the follower snapshot sync.
    pub async fn start(self: Arc<Self>, store: Arc<TaskStore>) {
        let replicator = self.clone();
        tokio::spawn(async move {
            replicator.drain_loop().await;
        });

        let replicator = self.clone();
        tokio::spawn(async move {
            replicator.follower_sync_loop(store).await;
        });
    }

    /// Hands a committed record to the replication channel.
    pub async fn publish(&self, record: TaskRecord) {
        match self.config.replication {
            ReplicationMode::Sync => self.fan_out(&record).await,
            ReplicationMode::Async => {
                if let Err(e) = self.tx.send(record).await {
                    warn!("Replication channel closed: {}", e);
                }
            }
        }
    }

    async fn drain_loop(self: Arc<Self>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            return;
        };

        while let Some(record) = rx.recv().await {
            self.fan_out(&record).await;
        }
    }

    /// Sends one record to every other replica, best effort with retries.
    /// A backup we cannot reach is left to the snapshot sync; the write has
    /// already committed on the primary.
    async fn fan_out(&self, record: &TaskRecord) {
        let state = self.monitor.state();
        if !state.is_primary() {
            debug!("Dropping replication of {} (no longer primary)", record.id);
            return;
        }

        let request = ReplicateRequest {
            from: self.monitor.local_id().clone(),
            epoch: state.epoch,
            record: record.clone(),
        };

        for replica in self.config.replicas.iter() {
            if &replica.id == self.monitor.local_id() {
                continue;
            }

            let url = format!("http://{}{}", replica.http_addr, ENDPOINT_REPLICATE);
            match self
                .post_with_retry(url, &request, REPLICATE_TIMEOUT, REPLICATE_ATTEMPTS)
                .await
            {
                Ok(response) => {
                    if let Ok(body) = response.json::<ReplicateResponse>().await {
                        if !body.applied {
                            debug!(
                                "Replica {} did not apply {} (stale epoch or version)",
                                replica.id, record.id
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to replicate {} to {}: {}",
                        record.id, replica.id, e
                    );
                }
            }
        }
    }

    /// Backup-side anti-entropy: periodically pull a full snapshot from the
    /// believed primary and merge it. Covers records missed while this
    /// replica was down or partitioned.
    async fn follower_sync_loop(self: Arc<Self>, store: Arc<TaskStore>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);

        loop {
            interval.tick().await;

            if self.monitor.state().is_primary() {
                continue;
            }
            let Some(primary_addr) = self.monitor.primary_http_addr() else {
                continue;
            };

            let url = format!("http://{}{}", primary_addr, ENDPOINT_SNAPSHOT);
            match self
                .get_with_retry(url, REPLICATE_TIMEOUT, REPLICATE_ATTEMPTS)
                .await
            {
                Ok(response) if response.status().is_success() => {
                    match response.json::<super::protocol::StoreSnapshot>().await {
                        Ok(snapshot) => {
                            if store.import_snapshot(snapshot) {
                                info!("Synced store from primary at {}", primary_addr);
                            }
                        }
                        Err(e) => warn!("Undecodable snapshot from primary: {}", e),
                    }
                }
                Ok(response) => {
                    // The believed primary may itself have stepped down.
                    debug!("Snapshot request refused: {}", response.status());
                }
                Err(e) => {
                    debug!("Snapshot pull from {} failed: {}", primary_addr, e);
                }
            }
        }
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> anyhow::Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> anyhow::Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
