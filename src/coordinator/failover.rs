//! Failover of items abandoned by crashed instances
//!
//! When an instance node disappears, the items it owned without a
//! completion record for the current execution get a pending failover
//! (`sharding/<item>/failover` = crashed owner id). An idle instance claims
//! one pending item at a time by writing its id into the ephemeral
//! `sharding/<item>/failovering` node under the failover mutex and fires
//! its job immediately. A claimant crash drops the claim, leaving the item
//! claimable again.

use super::config::ConfigService;
use super::sharding::ShardingService;
use super::ServiceContext;
use crate::error::{Error, Result};
use crate::node::{LeaderNode, ShardingNode};

/// Failover detection and claiming for one job
#[derive(Debug, Clone)]
pub struct FailoverService {
    ctx: ServiceContext,
    config: ConfigService,
    sharding: ShardingService,
}

impl FailoverService {
    pub fn new(ctx: ServiceContext, config: ConfigService, sharding: ShardingService) -> Self {
        Self {
            ctx,
            config,
            sharding,
        }
    }

    /// React to the disappearance of `instance_id`
    ///
    /// Records a failover for every item it abandoned, then tries to claim
    /// one. Claims released by crashed claimants are picked up here too.
    pub async fn on_instance_crashed(&self, instance_id: &str) -> Result<()> {
        if !self.config.load().await?.failover {
            return Ok(());
        }

        let items = self.sharding.get_crashed_sharding_items(instance_id).await?;
        for &item in &items {
            self.set_crashed_failover_flag(item, instance_id).await?;
        }
        if !items.is_empty() {
            tracing::warn!(
                job = self.ctx.job_name(),
                crashed = instance_id,
                ?items,
                "Items abandoned by crashed instance marked for failover"
            );
        }

        self.failover_if_necessary().await
    }

    /// Persist a failover for `item` unless one is already pending
    pub async fn set_crashed_failover_flag(&self, item: u32, original_task_id: &str) -> Result<()> {
        let path = ShardingNode::failover_path(item);
        if !self.ctx.storage.is_job_node_existed(&path).await? {
            self.ctx.storage.fill_job_node(&path, original_task_id).await?;
        }
        Ok(())
    }

    /// Claim one pending failover if the local job is idle
    pub async fn failover_if_necessary(&self) -> Result<()> {
        if !self.is_eligible().await? || self.get_unclaimed_items().await?.is_empty() {
            return Ok(());
        }

        let result = self
            .ctx
            .storage
            .execute_in_leader(LeaderNode::FAILOVER_LATCH, || async {
                if !self.is_eligible().await? {
                    return Ok(());
                }
                let Some(&item) = self.get_unclaimed_items().await?.first() else {
                    return Ok(());
                };

                let claimant = self.ctx.instance().id();
                self.ctx
                    .storage
                    .fill_ephemeral_job_node(&ShardingNode::failovering_path(item), claimant)
                    .await?;
                tracing::info!(job = self.ctx.job_name(), item, claimant, "Failover claimed");

                self.ctx.handle.trigger().trigger_now();
                Ok(())
            })
            .await;

        match result {
            Err(e @ Error::LockTimeout { .. }) => {
                tracing::warn!(job = self.ctx.job_name(), error = %e, "Failover claim skipped");
                Ok(())
            }
            other => other,
        }
    }

    async fn is_eligible(&self) -> Result<bool> {
        let handle = &self.ctx.handle;
        if handle.is_running() || handle.is_shutdown() || handle.is_paused() {
            return Ok(false);
        }
        Ok(self.config.load().await?.failover)
    }

    /// Items with a pending failover nobody has claimed
    pub async fn get_unclaimed_items(&self) -> Result<Vec<u32>> {
        let storage = &self.ctx.storage;
        let mut unclaimed = Vec::new();
        for item in self.item_keys().await? {
            if storage
                .is_job_node_existed(&ShardingNode::failover_path(item))
                .await?
                && !storage
                    .is_job_node_existed(&ShardingNode::failovering_path(item))
                    .await?
            {
                unclaimed.push(item);
            }
        }
        Ok(unclaimed)
    }

    /// Items claimed by `instance_id`
    pub async fn get_failovering_items(&self, instance_id: &str) -> Result<Vec<u32>> {
        let mut claimed = Vec::new();
        for item in self.item_keys().await? {
            let claimant = self
                .ctx
                .storage
                .get_job_node_data(&ShardingNode::failovering_path(item))
                .await?;
            if claimant.as_deref() == Some(instance_id) {
                claimed.push(item);
            }
        }
        Ok(claimed)
    }

    /// Items the local instance claimed
    pub async fn get_local_failover_items(&self) -> Result<Vec<u32>> {
        if self.ctx.handle.is_shutdown() {
            return Ok(Vec::new());
        }
        self.get_failovering_items(self.ctx.instance().id()).await
    }

    /// Local items that have a pending failover and must not run here
    pub async fn get_local_take_off_items(&self) -> Result<Vec<u32>> {
        let mut take_off = Vec::new();
        for item in self.sharding.get_local_sharding_items().await? {
            if self
                .ctx
                .storage
                .is_job_node_existed(&ShardingNode::failover_path(item))
                .await?
            {
                take_off.push(item);
            }
        }
        Ok(take_off)
    }

    /// Clear failover state of items whose failover run finished
    pub async fn update_failover_complete(&self, items: &[u32]) -> Result<()> {
        for &item in items {
            self.remove_item_failover(item).await?;
        }
        Ok(())
    }

    /// Drop every pending and claimed failover of the job
    pub async fn remove_failover_info(&self) -> Result<()> {
        for item in self.item_keys().await? {
            self.remove_item_failover(item).await?;
        }
        Ok(())
    }

    async fn remove_item_failover(&self, item: u32) -> Result<()> {
        let storage = &self.ctx.storage;
        storage
            .remove_job_node_if_existed(&ShardingNode::failover_path(item))
            .await?;
        storage
            .remove_job_node_if_existed(&ShardingNode::failovering_path(item))
            .await
    }

    async fn item_keys(&self) -> Result<Vec<u32>> {
        let mut items: Vec<u32> = self
            .ctx
            .storage
            .get_job_node_children_keys(ShardingNode::ROOT)
            .await?
            .iter()
            .filter_map(|key| key.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }
}
