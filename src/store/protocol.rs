//! Replication Wire Protocol
//!
//! DTOs for the primary -> backup push channel and the snapshot pull used by
//! followers as anti-entropy.

use serde::{Deserialize, Serialize};

use super::types::TaskRecord;
use crate::cluster::types::{Epoch, ReplicaId};

pub const ENDPOINT_REPLICATE: &str = "/internal/replicate";
pub const ENDPOINT_SNAPSHOT: &str = "/internal/snapshot";

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub from: ReplicaId,
    /// Sender's leadership epoch; backups drop payloads below the highest
    /// epoch they have observed (zombie primary rejection).
    pub epoch: Epoch,
    pub record: TaskRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub applied: bool,
}

/// Full-state transfer: every record plus the sequence the store had reached
/// when the snapshot was taken.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u64,
    pub taken_at: u64,
    pub tasks: Vec<TaskRecord>,
}
