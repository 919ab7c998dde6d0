use super::protocol::{ReplicateRequest, ReplicateResponse, StoreSnapshot};
use super::store::TaskStore;
use crate::cluster::monitor::HealthMonitor;

use axum::{http::StatusCode, Extension, Json};
use std::sync::Arc;

/// Backup-side apply for one replicated record.
///
/// Payloads carrying an epoch below the highest one this replica has observed
/// come from a deposed primary that does not yet know it lost; they are
/// acknowledged but not applied.
pub async fn handle_replicate(
    Extension(store): Extension<Arc<TaskStore>>,
    Extension(monitor): Extension<Arc<HealthMonitor>>,
    Json(req): Json<ReplicateRequest>,
) -> (StatusCode, Json<ReplicateResponse>) {
    if req.epoch < monitor.max_observed_epoch() {
        tracing::warn!(
            "Rejecting replication of {} from {} (epoch {} < {})",
            req.record.id,
            req.from,
            req.epoch,
            monitor.max_observed_epoch()
        );
        return (StatusCode::OK, Json(ReplicateResponse { applied: false }));
    }

    monitor.observe_epoch(req.epoch);
    let applied = store.apply_replicated(req.record);

    (StatusCode::OK, Json(ReplicateResponse { applied }))
}

/// Serves a full snapshot to a syncing follower. Only the primary answers;
/// a follower's copy may itself be behind.
pub async fn handle_snapshot(
    Extension(store): Extension<Arc<TaskStore>>,
    Extension(monitor): Extension<Arc<HealthMonitor>>,
) -> (StatusCode, Json<Option<StoreSnapshot>>) {
    if !monitor.state().is_primary() {
        return (StatusCode::FORBIDDEN, Json(None));
    }

    (StatusCode::OK, Json(Some(store.export_snapshot())))
}
