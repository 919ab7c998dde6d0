use super::protocol::*;
use crate::cluster::monitor::HealthMonitor;
use crate::dispatch::dispatcher::Dispatcher;
use crate::store::store::TaskStore;
use crate::store::types::{QueueError, TaskKind, TaskRecord};

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use serde_json::json;
use std::sync::Arc;

const MAX_CRAWL_DEPTH: u32 = 5;

/// Checks a crawl submission and normalizes it into the stored payload.
fn validate_crawl(req: &CrawlRequest) -> Result<serde_json::Value, String> {
    if req.urls.is_empty() {
        return Err("urls must not be empty".to_string());
    }
    for url in &req.urls {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("not an http(s) url: {}", url));
        }
    }
    let depth = req.depth.unwrap_or(1);
    if depth > MAX_CRAWL_DEPTH {
        return Err(format!("depth {} exceeds maximum {}", depth, MAX_CRAWL_DEPTH));
    }

    Ok(json!({ "urls": req.urls, "depth": depth }))
}

fn validate_summarize(req: &SummarizeRequest) -> Result<serde_json::Value, String> {
    if req.content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }

    Ok(json!({ "content": req.content, "title": req.title }))
}

/// Shared submit path: a payload that fails validation still becomes a task,
/// terminal from birth, so the client can inspect the rejection later.
async fn submit(
    store: &TaskStore,
    kind: TaskKind,
    raw: serde_json::Value,
    validated: Result<serde_json::Value, String>,
) -> Result<Json<SubmitResponse>, QueueError> {
    let record = match validated {
        Ok(payload) => store.insert(kind, payload).await?,
        Err(reason) => {
            tracing::info!("Rejecting {:?} submission: {}", kind, reason);
            store.insert_rejected(kind, raw, reason).await?
        }
    };

    Ok(Json(SubmitResponse {
        task_id: record.id,
        state: record.state,
    }))
}

pub async fn handle_submit_crawl(
    Extension(store): Extension<Arc<TaskStore>>,
    Json(req): Json<CrawlRequest>,
) -> Result<Json<SubmitResponse>, QueueError> {
    let validated = validate_crawl(&req);
    let raw = json!({ "urls": req.urls, "depth": req.depth });
    submit(&store, TaskKind::Crawl, raw, validated).await
}

pub async fn handle_submit_summarize(
    Extension(store): Extension<Arc<TaskStore>>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<SubmitResponse>, QueueError> {
    let validated = validate_summarize(&req);
    let raw = json!({ "content": req.content, "title": req.title });
    submit(&store, TaskKind::Summarize, raw, validated).await
}

/// Task lookup. Served from the local copy on any replica; a backup may lag
/// the primary by the replication interval.
pub async fn handle_get_task(
    Extension(store): Extension<Arc<TaskStore>>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, QueueError> {
    let id = crate::store::types::TaskId(id);
    store
        .get(&id)
        .map(Json)
        .ok_or(QueueError::TaskNotFound(id))
}

pub async fn handle_list_tasks(
    Extension(store): Extension<Arc<TaskStore>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<TaskRecord>> {
    Json(store.list(query.state))
}

pub async fn handle_health(
    Extension(store): Extension<Arc<TaskStore>>,
    Extension(monitor): Extension<Arc<HealthMonitor>>,
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
) -> Json<HealthResponse> {
    let state = monitor.state();

    Json(HealthResponse {
        replica: monitor.local_id().clone(),
        role: state.role,
        epoch: state.epoch,
        primary: state.primary,
        alive_replicas: monitor.alive_replicas(),
        active_workers: dispatcher.registry.len(),
        tasks: store.status_counts(),
        queue_depth: store.queue_depth(),
    })
}
