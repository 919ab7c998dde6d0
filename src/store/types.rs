use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::types::WorkerId;

/// Unique identifier for a task, generated at submission and stable for the
/// task's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Crawl,
    Summarize,
}

/// Task lifecycle. Transitions are monotonic except Assigned -> Queued, which
/// happens when the assigned worker is lost or the assignment stalls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Assigned,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// The stored representation of one task. This is what gets replicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Kind-specific input, opaque to the queue: `{urls, depth}` for crawls,
    /// article content for summaries.
    pub payload: serde_json::Value,
    pub state: TaskState,
    pub assigned_worker: Option<WorkerId>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Failed or lost attempts so far; bounded by the configured maximum.
    pub attempts: u32,
    pub created_at: u64,
    pub updated_at: u64,
    /// Store sequence at last write; replication keeps the higher version.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub assigned: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Errors surfaced by the queue and mapped onto HTTP status codes.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Request reached a replica that is not the primary. Carries the HTTP
    /// address of the believed primary so the caller can retry there.
    #[error("this replica is not the primary")]
    NotPrimary { primary: Option<String> },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("worker {0} is not registered with this primary")]
    UnknownWorker(WorkerId),

    /// The reporting worker is no longer the task's assignee (the task was
    /// requeued or reassigned, typically across a failover). The worker must
    /// discard its in-flight work and pull a fresh assignment.
    #[error("assignment for task {0} is stale")]
    StaleAssignment(TaskId),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let (status, primary) = match &self {
            QueueError::NotPrimary { primary } => {
                (StatusCode::SERVICE_UNAVAILABLE, primary.clone())
            }
            QueueError::TaskNotFound(_) => (StatusCode::NOT_FOUND, None),
            QueueError::UnknownWorker(_) => (StatusCode::FORBIDDEN, None),
            QueueError::StaleAssignment(_) => (StatusCode::CONFLICT, None),
        };

        let body = ErrorBody {
            error: self.to_string(),
            primary,
        };

        (status, Json(body)).into_response()
    }
}
