//! shardkeeper - Elastic shard coordination for distributed jobs
//!
//! Instances of the same job coordinate through a ZooKeeper-like store to
//! elect a leader, split the job's shard items between them, detect crashed
//! peers and hand their unfinished items over to survivors.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Job configuration and process settings
//! - [`store`] - Coordination store abstraction and in-memory backend
//! - [`node`] - Node-path schema and job-scoped store access
//! - [`strategy`] - Shard allocation strategies
//! - [`coordinator`] - Leader, liveness, sharding, execution, failover and listeners
//! - [`job`] - Trigger channel, runner and job start-up
//! - [`utils`] - Tracing setup, retries and host helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardkeeper::prelude::*;
//!
//! struct Billing;
//!
//! #[async_trait::async_trait]
//! impl ShardingJob for Billing {
//!     async fn execute(&self, context: ShardingContext) -> anyhow::Result<()> {
//!         tracing::info!(item = context.sharding_item, "Billing shard");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let cluster = MemoryCluster::new();
//!     let registry = Arc::new(JobRegistry::new());
//!     let config = JobConfig::builder("billing", "Billing", 4).failover(true).build()?;
//!
//!     let job = JobBootstrap::new(
//!         cluster.connect(),
//!         registry,
//!         settings.coordinator,
//!         config,
//!         Arc::new(Billing),
//!     )
//!     .start()
//!     .await?;
//!
//!     job.trigger().trigger_now();
//!     job.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod node;
pub mod store;
pub mod strategy;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CoordinatorSettings, JobConfig, Settings};
    pub use crate::coordinator::{JobInstance, JobRegistry, JobServices, ServerStatus};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::job::{
        JobBootstrap, ScheduledJob, ShardingContext, ShardingJob, TriggerCommand, TriggerHandle,
    };
    pub use crate::store::{CoordinationStore, MemoryCluster, MemoryStore};
    pub use crate::strategy::{ShardingStrategy, ShardingStrategyType};
}

// Direct re-exports for convenience
pub use config::JobConfig;
pub use error::{Error, Result};
pub use job::{JobBootstrap, ShardingJob};
