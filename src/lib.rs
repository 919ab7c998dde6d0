//! Newsmesh: a replicated news crawling and summarization cluster.
//!
//! A fixed set of replicas runs a single replicated task queue; one of them
//! is primary at any time and hands tasks to a fleet of workers that crawl
//! news pages and summarize articles. Leadership is decided by static
//! priority with epoch-fenced failover, not consensus.
//!
//! ## Architecture Modules
//! - **`config`**: the static deployment topology (replica list in priority
//!   order, worker identities) and every tunable, overridable from the
//!   environment.
//! - **`cluster`**: replica-to-replica heartbeats over UDP, failure
//!   detection, and the leadership state machine with its epoch counter.
//! - **`store`**: the replicated task store. Single-writer on the primary,
//!   versioned records pushed to backups, snapshot pull as anti-entropy.
//! - **`dispatch`**: the primary's worker registry and the pull-model
//!   assignment protocol with bounded retries and stale-result fencing.
//! - **`api`**: the HTTP surface; client, worker, and replication endpoints
//!   on one router per replica.
//! - **`worker`**: the worker process; executor registry plus the agent loop
//!   that polls the primary, runs tasks under a timeout, and reports back.

pub mod api;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod store;
pub mod worker;
