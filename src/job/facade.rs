//! Coordination calls made around one job execution

use std::collections::BTreeMap;
use std::sync::Arc;

use super::context::ShardingContexts;
use crate::coordinator::{JobHandle, JobServices};
use crate::error::Result;

/// Narrow view of the job services used by the runner
#[derive(Debug, Clone)]
pub struct JobFacade {
    services: Arc<JobServices>,
}

impl JobFacade {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self { services }
    }

    pub fn job_name(&self) -> &str {
        self.services.job_name()
    }

    pub fn handle(&self) -> &Arc<JobHandle> {
        self.services.handle()
    }

    /// Fail when the local clock drifts too far from the store clock
    pub async fn check_job_execution_environment(&self) -> Result<()> {
        self.services
            .config
            .check_max_time_diff_seconds_tolerable()
            .await
    }

    /// Items the local instance runs in this execution
    ///
    /// Claimed failover items take precedence. Otherwise the assignment is
    /// brought up to date first, then items handed over to a failover
    /// claimant and operator-disabled items are removed.
    pub async fn get_sharding_contexts(&self) -> Result<ShardingContexts> {
        let services = &self.services;
        let config = services.config.load().await?;
        let parameters = config.parse_item_parameters()?;
        let build = |items: Vec<u32>| {
            ShardingContexts::new(
                config.job_name.clone(),
                services.handle().instance().id(),
                config.sharding_total_count,
                config.job_parameter.clone(),
                parameters.clone(),
                items,
            )
        };

        if config.failover {
            let claimed = services.failover.get_local_failover_items().await?;
            if !claimed.is_empty() {
                return Ok(build(claimed).with_failover());
            }
        }

        services.sharding.sharding_if_necessary().await?;
        let mut items = services.sharding.get_local_sharding_items().await?;
        if config.failover {
            let take_off = services.failover.get_local_take_off_items().await?;
            items.retain(|item| !take_off.contains(item));
        }
        let disabled = services.execution.get_disabled_items(&items).await?;
        items.retain(|item| !disabled.contains(item));

        Ok(build(items))
    }

    pub async fn register_job_begin(&self, contexts: &ShardingContexts) -> Result<()> {
        self.services.execution.register_job_begin(contexts).await
    }

    /// Record completion, and finish the failover of claimed items
    pub async fn register_job_completed(
        &self,
        contexts: &ShardingContexts,
        errors: &BTreeMap<u32, String>,
    ) -> Result<()> {
        let services = &self.services;
        services.execution.register_job_completed(contexts, errors).await?;
        if services.config.load().await?.failover {
            services
                .failover
                .update_failover_complete(contexts.items())
                .await?;
        }
        Ok(())
    }

    /// Record a misfire if the items are still running locally or elsewhere
    pub async fn misfire_if_running(&self, items: &[u32]) -> Result<bool> {
        let execution = &self.services.execution;
        if self.handle().is_running() {
            execution.set_misfire(items).await?;
            return Ok(true);
        }
        execution.misfire_if_has_running_items(items).await
    }

    /// Whether a misfired execution of `items` should be replayed now
    ///
    /// Pending misfires are dropped when the job does not replay misfires.
    pub async fn is_execute_misfired(&self, items: &[u32]) -> Result<bool> {
        let execution = &self.services.execution;
        if !self.services.config.load().await?.misfire {
            execution.clear_misfire(items).await?;
            return Ok(false);
        }
        Ok(self.is_eligible_for_job_running().await?
            && !execution.get_misfired_job_items(items).await?.is_empty())
    }

    pub async fn clear_misfire(&self, items: &[u32]) -> Result<()> {
        self.services.execution.clear_misfire(items).await
    }

    /// Not paused, not shutting down and no resharding pending
    pub async fn is_eligible_for_job_running(&self) -> Result<bool> {
        let handle = self.handle();
        if handle.is_paused() || handle.is_shutdown() {
            return Ok(false);
        }
        Ok(!self.services.sharding.is_need_sharding().await?)
    }

    pub async fn failover_if_necessary(&self) -> Result<()> {
        self.services.failover.failover_if_necessary().await
    }

    pub async fn is_need_sharding(&self) -> Result<bool> {
        self.services.sharding.is_need_sharding().await
    }
}
