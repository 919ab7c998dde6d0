//! HTTP Surface Module
//!
//! Assembles the replica's single router: the client-facing task API, the
//! worker assignment endpoints, and the internal replication channel. Every
//! replica serves all three; write paths answer `NotPrimary` with a pointer
//! to the believed primary when reached on a backup.

pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

use crate::cluster::monitor::HealthMonitor;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::protocol::{
    ENDPOINT_POLL, ENDPOINT_REGISTER, ENDPOINT_REPORT, ENDPOINT_WORKER_HEARTBEAT,
};
use crate::store::protocol::{ENDPOINT_REPLICATE, ENDPOINT_SNAPSHOT};
use crate::store::store::TaskStore;

pub fn build_router(
    store: Arc<TaskStore>,
    monitor: Arc<HealthMonitor>,
    dispatcher: Arc<Dispatcher>,
) -> Router {
    Router::new()
        // Client API
        .route("/tasks/crawl", post(handlers::handle_submit_crawl))
        .route("/tasks/summarize", post(handlers::handle_submit_summarize))
        .route("/tasks", get(handlers::handle_list_tasks))
        .route("/task/:id", get(handlers::handle_get_task))
        .route("/health", get(handlers::handle_health))
        // Worker assignment
        .route(
            ENDPOINT_REGISTER,
            post(crate::dispatch::handlers::handle_worker_register),
        )
        .route(ENDPOINT_POLL, post(crate::dispatch::handlers::handle_worker_poll))
        .route(ENDPOINT_REPORT, post(crate::dispatch::handlers::handle_worker_report))
        .route(
            ENDPOINT_WORKER_HEARTBEAT,
            post(crate::dispatch::handlers::handle_worker_heartbeat),
        )
        // Replication channel
        .route(ENDPOINT_REPLICATE, post(crate::store::handlers::handle_replicate))
        .route(ENDPOINT_SNAPSHOT, get(crate::store::handlers::handle_snapshot))
        .layer(Extension(store))
        .layer(Extension(monitor))
        .layer(Extension(dispatcher))
}
