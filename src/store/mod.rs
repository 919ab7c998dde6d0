//! Replicated Task Store Module
//!
//! Ground truth for every submitted task: a mapping from task id to record,
//! held independently by every replica and kept convergent by a primary ->
//! backup push channel.
//!
//! ## Core Concepts
//! - **Single writer**: only the primary mutates the store through the public
//!   API; mutating calls on a backup fail with `NotPrimary`.
//! - **Versioning**: every committed mutation stamps the record with a global
//!   sequence number; replication applies a record only if its version is
//!   newer than the local copy, making pushes idempotent and reorderable.
//! - **Replication**: committed records fan out to all other replicas over
//!   HTTP, synchronously or via a background queue (configurable). Backups
//!   additionally pull full snapshots from the primary as anti-entropy.
//! - **Reads**: always local, on any replica -- availability over strict
//!   consistency, with a documented loss window bounded by replication lag.

pub mod handlers;
pub mod protocol;
pub mod replication;
pub mod store;
pub mod types;
