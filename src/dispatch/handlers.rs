use super::dispatcher::Dispatcher;
use super::protocol::*;
use crate::store::types::QueueError;

use axum::{response::IntoResponse, Extension, Json};
use std::sync::Arc;

pub async fn handle_worker_register(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, QueueError> {
    dispatcher.register(&req.worker).await?;

    Ok(Json(RegisterResponse {
        epoch: dispatcher.current_epoch(),
    }))
}

pub async fn handle_worker_poll(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(req): Json<PollRequest>,
) -> Result<Json<PollResponse>, QueueError> {
    let assignment = dispatcher.poll(&req.worker).await?;

    Ok(Json(PollResponse {
        assignment,
        epoch: dispatcher.current_epoch(),
    }))
}

pub async fn handle_worker_report(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, QueueError> {
    let record = dispatcher.report(req).await?;

    Ok(Json(ReportResponse {
        task_id: record.id,
        state: record.state,
    }))
}

pub async fn handle_worker_heartbeat(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<impl IntoResponse, QueueError> {
    dispatcher.heartbeat(&req.worker, req.current_task).await?;
    Ok(Json(WorkerHeartbeatResponse {
        epoch: dispatcher.current_epoch(),
    }))
}
