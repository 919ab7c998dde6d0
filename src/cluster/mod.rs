//! Replica Coordination Module
//!
//! Implements leadership tracking for the replica set: epoch-stamped
//! heartbeats over UDP, missed-heartbeat failure detection, and a
//! priority-based (not voting-based) election -- the lowest-ordinal replica
//! believed alive is always the one that promotes itself.
//!
//! ## Core Mechanisms
//! - **Heartbeats**: every replica periodically sends its role and epoch to
//!   every other replica in the static topology.
//! - **Failure Detection**: a counter of consecutive missed heartbeats drives
//!   the Alive -> Suspected -> Dead transition, absorbing transient jitter.
//! - **Epochs**: a monotonically increasing leadership term stamped on every
//!   message; stale claims from a previously demoted primary are rejected by
//!   epoch comparison, ordinal order breaks same-epoch races.

pub mod monitor;
pub mod types;
