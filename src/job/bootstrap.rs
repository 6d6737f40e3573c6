//! Job start-up and shutdown
//!
//! Start-up order per instance:
//!
//! 1. validate the configuration and claim the job name in the registry
//! 2. check clock drift, persist the configuration (conflicts abort)
//! 3. register server and instance, elect a leader, request resharding
//! 4. start the listener, reconcile loop and runner
//!
//! Registration writes are retried on recoverable store errors.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::facade::JobFacade;
use super::runner::{JobRunner, ShardingJob};
use super::trigger::TriggerHandle;
use crate::config::{CoordinatorSettings, JobConfig};
use crate::coordinator::{
    JobHandle, JobInstance, JobRegistry, JobServices, ListenerManager, ServiceContext,
};
use crate::error::{Error, Result};
use crate::node::JobNodeStorage;
use crate::store::CoordinationStore;
use crate::utils::local_ip;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Everything needed to bring one job online on this instance
pub struct JobBootstrap {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<JobRegistry>,
    settings: CoordinatorSettings,
    config: JobConfig,
    job: Arc<dyn ShardingJob>,
    retry: RetryConfig,
}

impl JobBootstrap {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: Arc<JobRegistry>,
        settings: CoordinatorSettings,
        config: JobConfig,
        job: Arc<dyn ShardingJob>,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            config,
            job,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for registration writes
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register the job and start its background tasks
    pub async fn start(self) -> Result<ScheduledJob> {
        self.config.validate()?;
        let job_name = self.config.job_name.clone();

        let ip = self.settings.local_ip.clone().unwrap_or_else(local_ip);
        let (trigger, triggers) = TriggerHandle::channel(self.settings.trigger_queue_capacity);
        let handle = Arc::new(JobHandle::new(JobInstance::local(ip), trigger));
        self.registry.register(&job_name, Arc::clone(&handle)).await?;

        let storage = JobNodeStorage::new(
            Arc::clone(&self.store),
            job_name.as_str(),
            self.settings.lock_timeout(),
        );
        let context = ServiceContext::new(
            storage,
            Arc::clone(&handle),
            Arc::clone(&self.registry),
            self.settings.clone(),
        );
        let services = Arc::new(JobServices::new(context));

        let config = match self.register_online(&services).await {
            Ok(config) => config,
            Err(e) => {
                services.begin_shutdown();
                services.release_registration().await;
                tracing::error!(job = %job_name, error = %e, "Job failed to start");
                return Err(e);
            }
        };

        let listener = ListenerManager::new(Arc::clone(&services)).start();
        let reconcile = (config.reconcile_interval_minutes > 0).then(|| {
            let interval = Duration::from_secs(u64::from(config.reconcile_interval_minutes) * 60);
            services.reconcile.clone().start(interval)
        });
        let runner = JobRunner::new(JobFacade::new(Arc::clone(&services)), self.job, triggers).spawn();
        handle.trigger().start();

        tracing::info!(
            job = %job_name,
            instance = %handle.instance(),
            sharding_total_count = config.sharding_total_count,
            "Job started"
        );

        Ok(ScheduledJob {
            services,
            runner,
            listener,
            reconcile,
        })
    }

    /// Persist configuration and liveness, returning the effective config
    async fn register_online(&self, services: &JobServices) -> Result<JobConfig> {
        with_retry_if(
            &self.retry,
            || async {
                services
                    .config
                    .check_time_diff(self.config.max_time_diff_seconds)
                    .await?;
                let config = services.config.persist(&self.config).await?;
                services
                    .handle()
                    .set_sharding_total_count(config.sharding_total_count);

                services.server.persist_online(!config.disabled).await?;
                services.instance.persist_online().await?;
                services.leader.elect_leader().await?;
                services.sharding.set_resharding_flag().await?;
                Ok::<_, Error>(config)
            },
            Error::is_recoverable,
        )
        .await
    }
}

/// A job running on this instance
pub struct ScheduledJob {
    services: Arc<JobServices>,
    runner: JoinHandle<()>,
    listener: JoinHandle<()>,
    reconcile: Option<JoinHandle<()>>,
}

impl ScheduledJob {
    pub fn job_name(&self) -> &str {
        self.services.job_name()
    }

    pub fn instance(&self) -> &JobInstance {
        self.services.handle().instance()
    }

    /// Handle for whatever drives the schedule
    pub fn trigger(&self) -> &TriggerHandle {
        self.services.handle().trigger()
    }

    pub fn handle(&self) -> &Arc<JobHandle> {
        self.services.handle()
    }

    pub fn services(&self) -> &Arc<JobServices> {
        &self.services
    }

    pub fn is_shutdown(&self) -> bool {
        self.services.handle().is_shutdown()
    }

    /// Stop the job, letting in-flight executions finish
    ///
    /// Leadership and liveness are released only after the runner has
    /// drained.
    pub async fn shutdown(self) -> Result<()> {
        let job = self.services.job_name().to_string();
        self.services.begin_shutdown();

        if let Err(e) = self.runner.await {
            tracing::error!(job = %job, error = %e, "Runner task failed");
        }
        self.services.release_registration().await;

        if let Err(e) = self.listener.await {
            tracing::error!(job = %job, error = %e, "Listener task failed");
        }
        if let Some(reconcile) = self.reconcile {
            if let Err(e) = reconcile.await {
                tracing::error!(job = %job, error = %e, "Reconcile task failed");
            }
        }

        tracing::info!(job = %job, "Job shut down");
        Ok(())
    }
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("job_name", &self.job_name())
            .field("instance", &self.instance().id())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
