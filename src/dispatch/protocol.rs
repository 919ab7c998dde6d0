//! Worker Assignment Wire Protocol
//!
//! DTOs for the worker -> primary HTTP surface: polling for work, reporting
//! outcomes, and liveness heartbeats.

use serde::{Deserialize, Serialize};

use super::types::WorkerId;
use crate::cluster::types::Epoch;
use crate::store::types::{TaskId, TaskKind};

pub const ENDPOINT_REGISTER: &str = "/worker/register";
pub const ENDPOINT_POLL: &str = "/worker/poll";
pub const ENDPOINT_REPORT: &str = "/worker/report";
pub const ENDPOINT_WORKER_HEARTBEAT: &str = "/worker/heartbeat";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker: WorkerId,
}

/// Registration ack. The epoch tells the worker which leadership term its
/// future assignments will be fenced against.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub epoch: Epoch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollRequest {
    pub worker: WorkerId,
}

/// One unit of work handed to a worker. The epoch fences the assignment: a
/// result reported under an older epoch is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub epoch: Epoch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub assignment: Option<Assignment>,
    pub epoch: Epoch,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success { result: serde_json::Value },
    Failure { error: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportRequest {
    pub worker: WorkerId,
    pub task_id: TaskId,
    pub epoch: Epoch,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub task_id: TaskId,
    pub state: crate::store::types::TaskState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker: WorkerId,
    pub current_task: Option<TaskId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerHeartbeatResponse {
    pub epoch: Epoch,
}
