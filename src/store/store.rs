use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::StoreSnapshot;
use super::replication::Replicator;
use super::types::{
    now_ms, QueueError, StatusCounts, TaskId, TaskKind, TaskRecord, TaskState,
};
use crate::cluster::types::LeadershipState;
use crate::config::ClusterConfig;

/// The task store one replica holds.
///
/// All mutating calls are primary-only and commit locally before handing the
/// record to the replication channel; reads are always local, on any replica.
/// Backups are written exclusively through [`TaskStore::apply_replicated`]
/// and [`TaskStore::import_snapshot`].
pub struct TaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
    /// Global mutation sequence; stamped on records as their version.
    seq: AtomicU64,
    leadership: watch::Receiver<LeadershipState>,
    config: Arc<ClusterConfig>,
    replicator: Option<Arc<Replicator>>,
}

impl TaskStore {
    pub fn new(
        config: Arc<ClusterConfig>,
        leadership: watch::Receiver<LeadershipState>,
        replicator: Option<Arc<Replicator>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            seq: AtomicU64::new(0),
            leadership,
            config,
            replicator,
        })
    }

    fn ensure_primary(&self) -> Result<(), QueueError> {
        let state = self.leadership.borrow();
        if state.is_primary() {
            return Ok(());
        }
        Err(QueueError::NotPrimary {
            primary: state
                .primary
                .as_ref()
                .and_then(|id| self.config.replica(id))
                .map(|spec| spec.http_addr.to_string()),
        })
    }

    fn next_version(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn publish(&self, record: TaskRecord) {
        if let Some(replicator) = &self.replicator {
            replicator.publish(record).await;
        }
    }

    /// Creates a new task in state Queued. Primary-only.
    pub async fn insert(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<TaskRecord, QueueError> {
        self.ensure_primary()?;

        let now = now_ms();
        let record = TaskRecord {
            id: TaskId::new(),
            kind,
            payload,
            state: TaskState::Queued,
            assigned_worker: None,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            version: self.next_version(),
        };

        self.tasks.insert(record.id.clone(), record.clone());
        debug!("Enqueued {:?} task {}", kind, record.id);

        self.publish(record.clone()).await;
        Ok(record)
    }

    /// Creates a task that failed validation: stored terminal so the error is
    /// visible to status polls, isolated from every other task.
    pub async fn insert_rejected(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        error: String,
    ) -> Result<TaskRecord, QueueError> {
        self.ensure_primary()?;

        let now = now_ms();
        let record = TaskRecord {
            id: TaskId::new(),
            kind,
            payload,
            state: TaskState::Failed,
            assigned_worker: None,
            result: None,
            error: Some(error),
            attempts: 0,
            created_at: now,
            updated_at: now,
            version: self.next_version(),
        };

        self.tasks.insert(record.id.clone(), record.clone());
        self.publish(record.clone()).await;
        Ok(record)
    }

    /// Applies a mutation to an existing task. Primary-only; bumps the
    /// record's version and pushes it to the replication channel.
    pub async fn update<F>(&self, id: &TaskId, mutate: F) -> Result<TaskRecord, QueueError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        self.ensure_primary()?;

        // Clone before the await so no map guard is held across it.
        let record = {
            let mut entry = self
                .tasks
                .get_mut(id)
                .ok_or_else(|| QueueError::TaskNotFound(id.clone()))?;
            mutate(entry.value_mut());
            entry.version = self.next_version();
            entry.updated_at = now_ms();
            entry.clone()
        };

        self.publish(record.clone()).await;
        Ok(record)
    }

    /// Local read; never a cross-replica round trip.
    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(id).map(|entry| entry.clone())
    }

    pub fn list(&self, filter: Option<TaskState>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|entry| filter.map(|s| entry.state == s).unwrap_or(true))
            .map(|entry| entry.clone())
            .collect();
        records.sort_by(|a, b| (a.created_at, &a.id.0).cmp(&(b.created_at, &b.id.0)));
        records
    }

    /// FIFO head of the queue: oldest enqueue time, ties broken by id so the
    /// order stays deterministic.
    pub fn oldest_queued(&self) -> Option<TaskRecord> {
        self.tasks
            .iter()
            .filter(|entry| entry.state == TaskState::Queued)
            .map(|entry| entry.clone())
            .min_by(|a, b| (a.created_at, &a.id.0).cmp(&(b.created_at, &b.id.0)))
    }

    pub fn queue_depth(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.state == TaskState::Queued)
            .count()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.tasks.iter() {
            match entry.state {
                TaskState::Queued => counts.queued += 1,
                TaskState::Assigned => counts.assigned += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Promotion step: every Assigned task goes back to Queued, because the
    /// new primary cannot know whether its worker is still alive. Attempt
    /// counts are left untouched -- losing the leader is not the task's
    /// fault.
    pub async fn requeue_assigned_for_promotion(&self) -> Result<usize, QueueError> {
        let assigned: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| entry.state == TaskState::Assigned)
            .map(|entry| entry.id.clone())
            .collect();

        let count = assigned.len();
        for id in assigned {
            self.update(&id, |task| {
                task.state = TaskState::Queued;
                task.assigned_worker = None;
            })
            .await?;
        }

        if count > 0 {
            info!("Requeued {} assigned tasks after promotion", count);
        }
        Ok(count)
    }

    /// Backup-side write path, called only by the replication channel.
    /// Idempotent: the copy with the higher version wins.
    pub fn apply_replicated(&self, record: TaskRecord) -> bool {
        self.seq.fetch_max(record.version, Ordering::SeqCst);

        match self.tasks.get_mut(&record.id) {
            Some(mut existing) => {
                if record.version > existing.version {
                    *existing.value_mut() = record;
                    true
                } else {
                    false
                }
            }
            None => {
                self.tasks.insert(record.id.clone(), record);
                true
            }
        }
    }

    pub fn export_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.seq.load(Ordering::SeqCst),
            taken_at: now_ms(),
            tasks: self.tasks.iter().map(|entry| entry.clone()).collect(),
        }
    }

    /// Merges a snapshot pulled from the primary. Returns false if the
    /// snapshot carries nothing newer than local state.
    ///
    /// Local records the primary has never heard of are dropped: they were
    /// acked by a since-deposed primary whose replication never landed. The
    /// primary's copy is the only ground truth, and a record it does not
    /// hold can never reach a terminal state here.
    pub fn import_snapshot(&self, snapshot: StoreSnapshot) -> bool {
        if snapshot.version <= self.seq.load(Ordering::SeqCst) {
            debug!(
                "Ignoring snapshot at version {} (local seq is newer)",
                snapshot.version
            );
            return false;
        }

        let task_count = snapshot.tasks.len();
        let known: HashSet<TaskId> = snapshot.tasks.iter().map(|r| r.id.clone()).collect();
        for record in snapshot.tasks {
            self.apply_replicated(record);
        }
        self.tasks.retain(|id, _| {
            if known.contains(id) {
                return true;
            }
            warn!("Dropping task {} unknown to the primary", id);
            false
        });
        self.seq.fetch_max(snapshot.version, Ordering::SeqCst);

        info!(
            "Imported snapshot at version {} with {} tasks",
            self.seq.load(Ordering::SeqCst),
            task_count
        );
        true
    }
}
