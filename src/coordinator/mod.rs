//! Coordination services of an elastic job
//!
//! Every instance of a job runs the same set of services against the job's
//! subtree in the coordination store. There is no central scheduler; the
//! instance holding the leadership token performs resharding, everyone else
//! follows the assignment it writes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 JobServices                  │
//! │                                              │
//! │  ConfigService    LeaderService              │
//! │  ServerService    InstanceService            │
//! │  ShardingService  ExecutionService           │
//! │  FailoverService  ReconcileService           │
//! │                                              │
//! │  ListenerManager ── store events ──► match   │
//! └──────────────────┬───────────────────────────┘
//!                    │ JobNodeStorage (/<job>/...)
//!            ┌───────▼────────┐
//!            │ CoordinationStore │
//!            └────────────────┘
//! ```

pub mod config;
pub mod execution;
pub mod failover;
pub mod instance;
pub mod leader;
pub mod listener;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod sharding;

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinatorSettings;
use crate::error::Result;
use crate::node::JobNodeStorage;

pub use config::ConfigService;
pub use execution::{ExecutionService, ItemCompletion};
pub use failover::FailoverService;
pub use instance::{InstanceService, JobInstance};
pub use leader::LeaderService;
pub use listener::{JobEvent, ListenerManager};
pub use reconcile::ReconcileService;
pub use registry::{JobHandle, JobRegistry, RegistryStats};
pub use server::{ServerService, ServerStatus};
pub use sharding::ShardingService;

/// Shared state every service of one job is built from
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Job-scoped store access
    pub storage: JobNodeStorage,

    /// Local job state
    pub handle: Arc<JobHandle>,

    /// Process-wide registry
    pub registry: Arc<JobRegistry>,

    /// Timing settings
    pub settings: CoordinatorSettings,
}

impl ServiceContext {
    pub fn new(
        storage: JobNodeStorage,
        handle: Arc<JobHandle>,
        registry: Arc<JobRegistry>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            storage,
            handle,
            registry,
            settings,
        }
    }

    pub fn job_name(&self) -> &str {
        self.storage.job_name()
    }

    /// Local instance
    pub fn instance(&self) -> &JobInstance {
        self.handle.instance()
    }

    /// Poll `condition` until it holds or `timeout` elapses
    ///
    /// Returns whether the condition held before the deadline.
    pub(crate) async fn wait_until<F, Fut>(&self, timeout: Duration, mut condition: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.settings.poll_interval()).await;
        }
    }
}

/// All services of one job, wired together
#[derive(Debug, Clone)]
pub struct JobServices {
    pub context: ServiceContext,
    pub config: ConfigService,
    pub server: ServerService,
    pub instance: InstanceService,
    pub leader: LeaderService,
    pub execution: ExecutionService,
    pub sharding: ShardingService,
    pub failover: FailoverService,
    pub reconcile: ReconcileService,
}

impl JobServices {
    /// Build the service graph for one job
    pub fn new(context: ServiceContext) -> Self {
        let config = ConfigService::new(context.clone());
        let server = ServerService::new(context.clone());
        let instance = InstanceService::new(context.clone(), server.clone());
        let leader = LeaderService::new(context.clone(), server.clone());
        let execution = ExecutionService::new(context.clone(), config.clone());
        let sharding = ShardingService::new(
            context.clone(),
            config.clone(),
            leader.clone(),
            instance.clone(),
            execution.clone(),
        );
        let failover = FailoverService::new(context.clone(), config.clone(), sharding.clone());
        let reconcile = ReconcileService::new(context.clone(), leader.clone(), sharding.clone());

        Self {
            context,
            config,
            server,
            instance,
            leader,
            execution,
            sharding,
            failover,
            reconcile,
        }
    }

    pub fn job_name(&self) -> &str {
        self.context.job_name()
    }

    pub fn handle(&self) -> &Arc<JobHandle> {
        &self.context.handle
    }

    /// Begin shutdown: flag the job and stop accepting triggers
    pub fn begin_shutdown(&self) {
        if self.context.handle.mark_shutdown() {
            tracing::info!(job = self.job_name(), "Job shutting down");
        }
        self.context.handle.trigger().shutdown();
    }

    /// Give up leadership and liveness, then leave the registry
    ///
    /// Failures are logged; the ephemeral nodes disappear with the session
    /// anyway.
    pub async fn release_registration(&self) {
        let job = self.job_name();

        if let Err(e) = self.leader.remove_leadership().await {
            tracing::warn!(job, error = %e, "Failed to remove leadership during shutdown");
        }
        if let Err(e) = self.instance.remove_instance().await {
            tracing::warn!(job, error = %e, "Failed to remove instance during shutdown");
        }
        if self.context.registry.shutdown(job).await.is_err() {
            tracing::debug!(job, "Job was already removed from the registry");
        }
    }

    /// Shut the job down without waiting for in-flight executions
    pub async fn force_shutdown(&self) {
        self.begin_shutdown();
        self.release_registration().await;
    }
}
