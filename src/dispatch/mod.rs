//! Work Dispatch Module
//!
//! Connects the replicated queue to the worker fleet on the primary.
//!
//! ## Core Concepts
//! - **Pull model**: workers poll the primary for work; the dispatcher claims
//!   the oldest queued task and hands it out stamped with the current epoch.
//! - **Worker registry**: tracks the fleet from heartbeats and polls. A
//!   worker that stops heartbeating is declared lost and its in-flight task
//!   goes back to the queue with the attempt charged.
//! - **Bounded retries**: executor failures and lost workers requeue a task
//!   until its attempt budget runs out, then it fails permanently.
//! - **Epoch fencing**: results reported against an old epoch, or by a worker
//!   that is no longer the assignee, are rejected as stale.

pub mod dispatcher;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod types;
