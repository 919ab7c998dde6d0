use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::info;

use super::types::{WorkerId, WorkerStatus};
use crate::store::types::TaskId;

/// The primary's view of the worker fleet.
///
/// Entries appear when a worker first polls or heartbeats and are dropped
/// when it goes silent past the liveness budget or when a new primary takes
/// over. Not replicated: each primary rebuilds it from worker traffic.
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, WorkerStatus>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    /// Marks a worker alive, registering it on first contact.
    pub fn touch(&self, worker: &WorkerId) {
        self.workers
            .entry(worker.clone())
            .and_modify(|status| status.last_seen = Instant::now())
            .or_insert_with(|| {
                info!("Worker {} registered", worker);
                WorkerStatus::new()
            });
    }

    pub fn record_assignment(&self, worker: &WorkerId, task: TaskId) {
        if let Some(mut status) = self.workers.get_mut(worker) {
            status.current_task = Some(task);
        }
    }

    pub fn record_outcome(&self, worker: &WorkerId, success: bool) {
        if let Some(mut status) = self.workers.get_mut(worker) {
            status.current_task = None;
            if success {
                status.completed += 1;
            } else {
                status.failed += 1;
            }
        }
    }

    pub fn current_task(&self, worker: &WorkerId) -> Option<TaskId> {
        self.workers
            .get(worker)
            .and_then(|status| status.current_task.clone())
    }

    pub fn contains(&self, worker: &WorkerId) -> bool {
        self.workers.contains_key(worker)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Removes workers silent for longer than the budget and returns them
    /// with whatever task each was holding.
    pub fn evict_silent(&self, budget: Duration) -> Vec<(WorkerId, Option<TaskId>)> {
        let now = Instant::now();
        let silent: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_seen) > budget)
            .map(|entry| entry.key().clone())
            .collect();

        silent
            .into_iter()
            .filter_map(|id| {
                self.workers
                    .remove(&id)
                    .map(|(id, status)| (id, status.current_task))
            })
            .collect()
    }

    /// Promotion step: assignments from the previous term are void, so the
    /// whole fleet view is discarded.
    pub fn clear(&self) {
        self.workers.clear();
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
