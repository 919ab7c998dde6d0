//! Worker Module
//!
//! The process that actually crawls and summarizes. A worker holds no queue
//! state: it finds the primary, polls it for one assignment at a time, runs
//! the matching executor under a hard timeout, and reports the outcome. If
//! the primary changes mid-task the report is rejected as stale and the work
//! is discarded; the requeued copy will run again on some worker.

pub mod agent;
pub mod executors;

#[cfg(test)]
mod tests;
