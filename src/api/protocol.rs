//! Client-Facing DTOs

use serde::{Deserialize, Serialize};

use crate::cluster::types::{Epoch, ReplicaId, ReplicaRole};
use crate::store::types::{StatusCounts, TaskId, TaskState};

/// Crawl submission: seed URLs and how many link hops to follow from them.
#[derive(Debug, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub urls: Vec<String>,
    pub depth: Option<u32>,
}

/// Summarize submission: raw article text to condense.
#[derive(Debug, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Ack for a submission. A payload that failed validation still produces a
/// task, already terminal in state `failed`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub state: TaskState,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<TaskState>,
}

/// Answer to `GET /health`, served by every replica regardless of role. The
/// worker agents also use it to discover who currently leads.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub replica: ReplicaId,
    pub role: ReplicaRole,
    pub epoch: Epoch,
    pub primary: Option<ReplicaId>,
    pub alive_replicas: Vec<ReplicaId>,
    /// Workers currently registered with this replica; zero on backups.
    pub active_workers: usize,
    pub tasks: StatusCounts,
    pub queue_depth: usize,
}
