use std::sync::Arc;
use tracing::{debug, info, warn};

use super::protocol::{Assignment, ReportRequest, TaskOutcome};
use super::registry::WorkerRegistry;
use super::types::WorkerId;
use crate::cluster::monitor::HealthMonitor;
use crate::config::ClusterConfig;
use crate::store::store::TaskStore;
use crate::store::types::{now_ms, QueueError, TaskId, TaskRecord, TaskState};

/// Hands queued tasks to polling workers and folds their outcomes back into
/// the store. Runs on every replica but acts only while primary.
pub struct Dispatcher {
    config: Arc<ClusterConfig>,
    store: Arc<TaskStore>,
    monitor: Arc<HealthMonitor>,
    pub registry: WorkerRegistry,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ClusterConfig>,
        store: Arc<TaskStore>,
        monitor: Arc<HealthMonitor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            monitor,
            registry: WorkerRegistry::new(),
        })
    }

    pub fn current_epoch(&self) -> crate::cluster::types::Epoch {
        self.monitor.state().epoch
    }

    fn ensure_primary(&self) -> Result<(), QueueError> {
        if self.monitor.state().is_primary() {
            return Ok(());
        }
        Err(QueueError::NotPrimary {
            primary: self.monitor.primary_http_addr(),
        })
    }

    /// Introduces a worker to this primary. Idempotent; workers re-register
    /// after every failover because the registry does not survive one.
    pub async fn register(&self, worker: &WorkerId) -> Result<(), QueueError> {
        self.ensure_primary()?;
        if !self.config.is_known_worker(worker) {
            warn!("Rejecting registration from unknown worker {}", worker);
            return Err(QueueError::UnknownWorker(worker.clone()));
        }
        self.registry.touch(worker);
        Ok(())
    }

    /// One poll from a worker: claim the oldest queued task for it, or report
    /// an empty queue.
    pub async fn poll(&self, worker: &WorkerId) -> Result<Option<Assignment>, QueueError> {
        self.ensure_primary()?;
        if !self.config.is_known_worker(worker) {
            return Err(QueueError::UnknownWorker(worker.clone()));
        }
        self.registry.touch(worker);

        // Two workers can race for the same head-of-queue task; the claim is
        // checked under the record lock and the loser moves to the next one.
        loop {
            let Some(candidate) = self.store.oldest_queued() else {
                return Ok(None);
            };

            let mut claimed = false;
            let updated = self
                .store
                .update(&candidate.id, |task| {
                    if task.state == TaskState::Queued {
                        task.state = TaskState::Assigned;
                        task.assigned_worker = Some(worker.clone());
                        claimed = true;
                    }
                })
                .await?;

            if claimed {
                debug!("Assigned task {} to {}", updated.id, worker);
                self.registry.record_assignment(worker, updated.id.clone());
                return Ok(Some(Assignment {
                    task_id: updated.id,
                    kind: updated.kind,
                    payload: updated.payload,
                    epoch: self.monitor.state().epoch,
                }));
            }
        }
    }

    /// Folds a worker's outcome into the store.
    ///
    /// The report is fenced twice: by epoch, and by the record still naming
    /// this worker as assignee in state Assigned. Anything else is a stale
    /// result from before a requeue or failover and must be discarded, the
    /// requeued copy will run again (at-least-once).
    pub async fn report(&self, req: ReportRequest) -> Result<TaskRecord, QueueError> {
        self.ensure_primary()?;
        self.registry.touch(&req.worker);

        let state = self.monitor.state();
        if req.epoch < state.epoch {
            warn!(
                "Discarding result for {} from {} (epoch {} < {})",
                req.task_id, req.worker, req.epoch, state.epoch
            );
            return Err(QueueError::StaleAssignment(req.task_id));
        }

        let task = self
            .store
            .get(&req.task_id)
            .ok_or_else(|| QueueError::TaskNotFound(req.task_id.clone()))?;
        if task.state != TaskState::Assigned || task.assigned_worker.as_ref() != Some(&req.worker)
        {
            return Err(QueueError::StaleAssignment(req.task_id));
        }

        match req.outcome {
            TaskOutcome::Success { result } => {
                let updated = self
                    .store
                    .update(&req.task_id, |task| {
                        task.state = TaskState::Completed;
                        task.result = Some(result);
                        task.error = None;
                    })
                    .await?;
                self.registry.record_outcome(&req.worker, true);
                info!("Task {} completed by {}", updated.id, req.worker);
                Ok(updated)
            }
            TaskOutcome::Failure { error } => {
                warn!(
                    "Task {} failed on {} (attempt {}): {}",
                    req.task_id,
                    req.worker,
                    task.attempts + 1,
                    error
                );
                let updated = self.requeue_or_fail(&req.task_id, error).await?;
                self.registry.record_outcome(&req.worker, false);
                Ok(updated)
            }
        }
    }

    /// Liveness ping from a worker between polls.
    pub async fn heartbeat(
        &self,
        worker: &WorkerId,
        current_task: Option<TaskId>,
    ) -> Result<(), QueueError> {
        self.ensure_primary()?;
        if !self.config.is_known_worker(worker) {
            return Err(QueueError::UnknownWorker(worker.clone()));
        }
        self.registry.touch(worker);
        if let Some(task) = current_task {
            self.registry.record_assignment(worker, task);
        }
        Ok(())
    }

    /// Charges one attempt and either requeues the task or fails it for good.
    async fn requeue_or_fail(&self, id: &TaskId, error: String) -> Result<TaskRecord, QueueError> {
        let max_attempts = self.config.max_attempts;
        self.store
            .update(id, |task| {
                if task.state != TaskState::Assigned {
                    return;
                }
                task.attempts += 1;
                task.assigned_worker = None;
                task.error = Some(error);
                task.state = if task.attempts >= max_attempts {
                    TaskState::Failed
                } else {
                    TaskState::Queued
                };
            })
            .await
    }

    pub async fn start(self: Arc<Self>) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.worker_liveness_loop().await;
        });

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.stall_loop().await;
        });

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.promotion_loop().await;
        });
    }

    /// Evicts workers silent past the liveness budget and recovers their
    /// in-flight tasks.
    async fn worker_liveness_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        let budget = self.config.heartbeat_interval * self.config.max_missed_heartbeats;

        loop {
            interval.tick().await;
            if !self.monitor.state().is_primary() {
                continue;
            }

            for (worker, _) in self.registry.evict_silent(budget) {
                warn!("Worker {} declared lost", worker);
                // The store, not the registry, is authoritative for what the
                // worker was holding.
                for task in self.orphaned_tasks(&worker) {
                    info!("Recovering task {} from lost worker {}", task.id, worker);
                    let reason = format!("worker {} lost", worker);
                    if let Err(e) = self.requeue_or_fail(&task.id, reason).await {
                        warn!("Failed to recover task {}: {}", task.id, e);
                    }
                }
            }
        }
    }

    fn orphaned_tasks(&self, worker: &WorkerId) -> Vec<TaskRecord> {
        self.store
            .list(Some(TaskState::Assigned))
            .into_iter()
            .filter(|task| task.assigned_worker.as_ref() == Some(worker))
            .collect()
    }

    /// Requeues assignments that have sat unreported for too long, covering
    /// workers that heartbeat but never finish.
    async fn stall_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        let stall_ms = self.config.assignment_stall_timeout.as_millis() as u64;

        loop {
            interval.tick().await;
            if !self.monitor.state().is_primary() {
                continue;
            }

            let now = now_ms();
            for task in self.store.list(Some(TaskState::Assigned)) {
                if now.saturating_sub(task.updated_at) <= stall_ms {
                    continue;
                }
                warn!("Assignment of task {} stalled, requeuing", task.id);
                if let Err(e) = self
                    .requeue_or_fail(&task.id, "assignment stalled".to_string())
                    .await
                {
                    warn!("Failed to requeue stalled task {}: {}", task.id, e);
                }
            }
        }
    }

    /// Reacts to leadership changes. The fleet view never survives one: a
    /// new primary starts empty and waits for workers to re-register, and on
    /// promotion every Assigned task goes back to the queue because its
    /// worker's liveness is unknown to us.
    async fn promotion_loop(self: Arc<Self>) {
        let mut leadership = self.monitor.watch();
        let mut was_primary = leadership.borrow().is_primary();

        while leadership.changed().await.is_ok() {
            let is_primary = leadership.borrow().is_primary();
            if is_primary != was_primary {
                self.registry.clear();
            }
            if is_primary && !was_primary {
                info!("Taking over dispatch after promotion");
                if let Err(e) = self.store.requeue_assigned_for_promotion().await {
                    warn!("Promotion requeue failed: {}", e);
                }
            }
            was_primary = is_primary;
        }
    }
}

impl Dispatcher {
    /// Promotion steps, callable directly by tests.
    #[cfg(test)]
    pub(crate) async fn on_promoted(&self) -> Result<usize, QueueError> {
        self.registry.clear();
        self.store.requeue_assigned_for_promotion().await
    }
}
