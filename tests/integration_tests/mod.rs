//! Integration tests module
//!
//! End-to-end scenarios for elastic sharding:
//! - Leader mutual exclusion and shard assignment
//! - Failover liveness
//! - Misfire replay, clock skew and configuration conflicts
//! - Forced shutdown, graceful shutdown and reconnects

pub mod cluster_test;
pub mod execution_test;
pub mod failover_test;
pub mod fixtures;
pub mod lifecycle_test;
