//! Shard assignment
//!
//! Any instance may raise the resharding flag; only the leader acts on it.
//! The leader recomputes the whole assignment with the configured strategy
//! and writes it in one transaction that also clears the flag, so followers
//! either see the old assignment with the flag set or the new one without.

use super::config::ConfigService;
use super::execution::ExecutionService;
use super::instance::{InstanceService, JobInstance};
use super::leader::LeaderService;
use super::ServiceContext;
use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::node::{LeaderNode, ShardingNode};
use crate::store::TransactionOp;

/// Shard assignment for one job
#[derive(Debug, Clone)]
pub struct ShardingService {
    ctx: ServiceContext,
    config: ConfigService,
    leader: LeaderService,
    instance: InstanceService,
    execution: ExecutionService,
}

impl ShardingService {
    pub fn new(
        ctx: ServiceContext,
        config: ConfigService,
        leader: LeaderService,
        instance: InstanceService,
        execution: ExecutionService,
    ) -> Self {
        Self {
            ctx,
            config,
            leader,
            instance,
            execution,
        }
    }

    /// Ask the leader to recompute the assignment
    pub async fn set_resharding_flag(&self) -> Result<()> {
        self.ctx
            .storage
            .create_job_node_if_needed(LeaderNode::SHARDING_NECESSARY)
            .await
    }

    pub async fn is_need_sharding(&self) -> Result<bool> {
        self.ctx
            .storage
            .is_job_node_existed(LeaderNode::SHARDING_NECESSARY)
            .await
    }

    /// Reshard if the flag is set
    ///
    /// Followers wait (bounded) for the leader to finish. The leader waits
    /// for in-flight items when execution is monitored, then reassigns
    /// every item under the election mutex. Lock timeouts and wait
    /// timeouts leave the flag set for the next cycle.
    pub async fn sharding_if_necessary(&self) -> Result<()> {
        let instances = self.instance.get_available_job_instances().await?;
        if !self.is_need_sharding().await? || instances.is_empty() {
            return Ok(());
        }

        if !self.leader.is_leader_until_block().await? {
            self.block_until_sharding_completed().await?;
            return Ok(());
        }

        let config = self.config.load().await?;
        let job = self.ctx.job_name();

        if config.monitor_execution && !self.wait_for_running_items().await? {
            tracing::warn!(job, "Items still running, resharding postponed");
            return Ok(());
        }

        let result = self
            .ctx
            .storage
            .execute_in_leader(LeaderNode::ELECTION_LATCH, || async {
                if !self.is_need_sharding().await? {
                    return Ok(());
                }
                self.reshard(&config, &instances).await
            })
            .await;

        match result {
            Err(e @ Error::LockTimeout { .. }) => {
                tracing::warn!(job, error = %e, "Resharding skipped this cycle");
                Ok(())
            }
            other => other,
        }
    }

    async fn reshard(&self, config: &JobConfig, instances: &[JobInstance]) -> Result<()> {
        let storage = &self.ctx.storage;

        storage
            .fill_ephemeral_job_node(LeaderNode::SHARDING_PROCESSING, "")
            .await?;

        let outcome = self.assign(config, instances).await;

        if outcome.is_err() {
            // Unblock followers; the flag stays set for the next attempt
            if let Err(e) = storage
                .remove_job_node_if_existed(LeaderNode::SHARDING_PROCESSING)
                .await
            {
                tracing::warn!(
                    job = self.ctx.job_name(),
                    error = %e,
                    "Failed to remove resharding marker"
                );
            }
        }
        outcome
    }

    async fn assign(&self, config: &JobConfig, instances: &[JobInstance]) -> Result<()> {
        let total = config.sharding_total_count;
        self.reset_sharding_info(total).await?;
        self.execution.clean_previous_execution_info().await?;

        let assignment = config
            .sharding_strategy
            .create()
            .sharding(instances, self.ctx.job_name(), total);

        let mut ops = Vec::with_capacity(total as usize + 2);
        for (instance, items) in &assignment {
            for &item in items {
                ops.push(TransactionOp::Put {
                    path: ShardingNode::instance_path(item),
                    value: instance.id().to_string(),
                });
            }
        }
        ops.push(TransactionOp::Delete(LeaderNode::SHARDING_NECESSARY.to_string()));
        ops.push(TransactionOp::Delete(LeaderNode::SHARDING_PROCESSING.to_string()));
        self.ctx.storage.execute_in_transaction(ops).await?;

        tracing::info!(
            job = self.ctx.job_name(),
            sharding_total_count = total,
            instances = instances.len(),
            "Resharding completed"
        );
        Ok(())
    }

    /// Create `sharding/<i>` for every item and drop items beyond the total
    async fn reset_sharding_info(&self, total: u32) -> Result<()> {
        let storage = &self.ctx.storage;
        for item in 0..total {
            storage
                .remove_job_node_if_existed(&ShardingNode::instance_path(item))
                .await?;
            storage
                .create_job_node_if_needed(&ShardingNode::item_path(item))
                .await?;
        }
        for key in storage.get_job_node_children_keys(ShardingNode::ROOT).await? {
            if let Ok(item) = key.parse::<u32>() {
                if item >= total {
                    storage
                        .remove_job_node_if_existed(&ShardingNode::item_path(item))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn wait_for_running_items(&self) -> Result<bool> {
        self.ctx
            .wait_until(self.ctx.settings.sharding_wait_timeout(), || async {
                Ok(!self.execution.has_any_running_items().await?)
            })
            .await
    }

    async fn block_until_sharding_completed(&self) -> Result<()> {
        let storage = &self.ctx.storage;
        let completed = self
            .ctx
            .wait_until(self.ctx.settings.sharding_wait_timeout(), || async {
                if self.leader.is_leader().await? {
                    return Ok(true);
                }
                let pending = storage
                    .is_job_node_existed(LeaderNode::SHARDING_NECESSARY)
                    .await?
                    || storage
                        .is_job_node_existed(LeaderNode::SHARDING_PROCESSING)
                        .await?;
                Ok(!pending)
            })
            .await?;

        if !completed {
            tracing::warn!(job = self.ctx.job_name(), "Timed out waiting for resharding");
        }
        Ok(())
    }

    /// Items assigned to `instance_id`
    ///
    /// Empty when the instance is not alive.
    pub async fn get_sharding_items(&self, instance_id: &str) -> Result<Vec<u32>> {
        if !self.instance.is_instance_alive(instance_id).await? {
            return Ok(Vec::new());
        }
        let total = self.config.load().await?.sharding_total_count;
        let mut items = Vec::new();
        for item in 0..total {
            if self.owner_of(item).await?.as_deref() == Some(instance_id) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Items assigned to the local instance
    pub async fn get_local_sharding_items(&self) -> Result<Vec<u32>> {
        if self.ctx.handle.is_shutdown() {
            return Ok(Vec::new());
        }
        self.get_sharding_items(self.ctx.instance().id()).await
    }

    /// Recorded owner of an item
    pub async fn owner_of(&self, item: u32) -> Result<Option<String>> {
        self.ctx
            .storage
            .get_job_node_data(&ShardingNode::instance_path(item))
            .await
    }

    /// Whether any item is owned by an instance that is no longer live
    pub async fn has_sharding_info_in_offline_servers(&self) -> Result<bool> {
        let live = self.instance.get_live_instance_ids().await?;
        let total = self.config.load().await?.sharding_total_count;
        for item in 0..total {
            match self.owner_of(item).await? {
                Some(owner) if !live.contains(&owner) => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }

    /// Items a vanished instance abandoned mid-cycle
    ///
    /// Owned by `instance_id`, without a completion record for the current
    /// execution and without a pending failover.
    pub async fn get_crashed_sharding_items(&self, instance_id: &str) -> Result<Vec<u32>> {
        let storage = &self.ctx.storage;
        let total = self.config.load().await?.sharding_total_count;
        let mut crashed = Vec::new();
        for item in 0..total {
            if self.owner_of(item).await?.as_deref() != Some(instance_id) {
                continue;
            }
            if storage
                .is_job_node_existed(&ShardingNode::completed_path(item))
                .await?
                || storage
                    .is_job_node_existed(&ShardingNode::failover_path(item))
                    .await?
            {
                continue;
            }
            crashed.push(item);
        }
        Ok(crashed)
    }
}
