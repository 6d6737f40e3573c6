//! Execution status of shard items
//!
//! Per item the store records a `running` marker (ephemeral, owner id),
//! the last `completed` record, a pending `misfire` and an operator
//! `disabled` flag. Running markers are only written when
//! `monitor_execution` is on; the local running flag in the registry is
//! always maintained.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::ConfigService;
use super::ServiceContext;
use crate::error::Result;
use crate::job::context::ShardingContexts;
use crate::node::ShardingNode;

/// Payload of `sharding/<item>/completed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCompletion {
    pub instance_id: String,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Execution bookkeeping for one job
#[derive(Debug, Clone)]
pub struct ExecutionService {
    ctx: ServiceContext,
    config: ConfigService,
}

impl ExecutionService {
    pub fn new(ctx: ServiceContext, config: ConfigService) -> Self {
        Self { ctx, config }
    }

    /// Mark the items of `contexts` as running
    ///
    /// Previous completion records are dropped so `completed` always
    /// describes the latest execution.
    pub async fn register_job_begin(&self, contexts: &ShardingContexts) -> Result<()> {
        if contexts.is_empty() {
            return Ok(());
        }
        self.ctx.handle.set_running(true);
        if !self.config.load().await?.monitor_execution {
            return Ok(());
        }

        let storage = &self.ctx.storage;
        let owner = self.ctx.instance().id();
        for &item in contexts.items() {
            storage
                .remove_job_node_if_existed(&ShardingNode::completed_path(item))
                .await?;
            storage
                .fill_ephemeral_job_node(&ShardingNode::running_path(item), owner)
                .await?;
        }
        tracing::debug!(job = self.ctx.job_name(), items = ?contexts.items(), "Execution started");
        Ok(())
    }

    /// Record completion and clear running markers
    ///
    /// `errors` maps items whose execution failed to the error message.
    pub async fn register_job_completed(
        &self,
        contexts: &ShardingContexts,
        errors: &BTreeMap<u32, String>,
    ) -> Result<()> {
        self.ctx.handle.set_running(false);
        let monitor = self.config.load().await?.monitor_execution;
        let storage = &self.ctx.storage;
        let finished_at = Utc::now();

        for &item in contexts.items() {
            if monitor {
                let completion = ItemCompletion {
                    instance_id: self.ctx.instance().id().to_string(),
                    finished_at,
                    error: errors.get(&item).cloned(),
                };
                storage
                    .fill_job_node(
                        &ShardingNode::completed_path(item),
                        &serde_json::to_string(&completion)?,
                    )
                    .await?;
            }
            storage
                .remove_job_node_if_existed(&ShardingNode::running_path(item))
                .await?;
        }
        tracing::debug!(
            job = self.ctx.job_name(),
            items = ?contexts.items(),
            failed = errors.len(),
            "Execution completed"
        );
        Ok(())
    }

    /// Completion record of an item
    pub async fn get_completion(&self, item: u32) -> Result<Option<ItemCompletion>> {
        match self
            .ctx
            .storage
            .get_job_node_data(&ShardingNode::completed_path(item))
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Whether any of `items` carries a running marker
    pub async fn has_running_items(&self, items: &[u32]) -> Result<bool> {
        if !self.config.load().await?.monitor_execution {
            return Ok(false);
        }
        for &item in items {
            if self
                .ctx
                .storage
                .is_job_node_existed(&ShardingNode::running_path(item))
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether any item of the job carries a running marker
    pub async fn has_any_running_items(&self) -> Result<bool> {
        let total = self.config.load().await?.sharding_total_count;
        let items: Vec<u32> = (0..total).collect();
        self.has_running_items(&items).await
    }

    /// Flag `items` as misfired if any of them is still running
    pub async fn misfire_if_has_running_items(&self, items: &[u32]) -> Result<bool> {
        if !self.has_running_items(items).await? {
            return Ok(false);
        }
        self.set_misfire(items).await?;
        Ok(true)
    }

    pub async fn set_misfire(&self, items: &[u32]) -> Result<()> {
        for &item in items {
            self.ctx
                .storage
                .create_job_node_if_needed(&ShardingNode::misfire_path(item))
                .await?;
        }
        tracing::debug!(job = self.ctx.job_name(), ?items, "Misfire recorded");
        Ok(())
    }

    /// Subset of `items` with a pending misfire
    pub async fn get_misfired_job_items(&self, items: &[u32]) -> Result<Vec<u32>> {
        self.filter_items(items, ShardingNode::misfire_path).await
    }

    pub async fn clear_misfire(&self, items: &[u32]) -> Result<()> {
        for &item in items {
            self.ctx
                .storage
                .remove_job_node_if_existed(&ShardingNode::misfire_path(item))
                .await?;
        }
        Ok(())
    }

    /// Subset of `items` disabled by an operator
    pub async fn get_disabled_items(&self, items: &[u32]) -> Result<Vec<u32>> {
        self.filter_items(items, ShardingNode::disabled_path).await
    }

    /// Operator helper: disable or re-enable one item
    pub async fn set_disabled(&self, item: u32, disabled: bool) -> Result<()> {
        let path = ShardingNode::disabled_path(item);
        if disabled {
            self.ctx.storage.create_job_node_if_needed(&path).await
        } else {
            self.ctx.storage.remove_job_node_if_existed(&path).await
        }
    }

    /// Remove running markers of `items`
    pub async fn clear_running_info(&self, items: &[u32]) -> Result<()> {
        for &item in items {
            self.ctx
                .storage
                .remove_job_node_if_existed(&ShardingNode::running_path(item))
                .await?;
        }
        Ok(())
    }

    /// Remove running markers this instance left behind
    pub async fn clear_local_running_info(&self) -> Result<()> {
        let total = self.config.load().await?.sharding_total_count;
        let owner = self.ctx.instance().id();
        for item in 0..total {
            let path = ShardingNode::running_path(item);
            if self.ctx.storage.get_job_node_data(&path).await?.as_deref() == Some(owner) {
                self.ctx.storage.remove_job_node_if_existed(&path).await?;
            }
        }
        self.ctx.handle.set_running(false);
        Ok(())
    }

    /// Drop running, completed and misfire markers of every item before a
    /// new assignment
    ///
    /// The new owners start without flags left behind by the previous ones.
    pub async fn clean_previous_execution_info(&self) -> Result<()> {
        let total = self.config.load().await?.sharding_total_count;
        let items: Vec<u32> = (0..total).collect();
        self.clear_running_info(&items).await?;
        self.clear_misfire(&items).await?;
        for &item in &items {
            self.ctx
                .storage
                .remove_job_node_if_existed(&ShardingNode::completed_path(item))
                .await?;
        }
        Ok(())
    }

    async fn filter_items(&self, items: &[u32], path: fn(u32) -> String) -> Result<Vec<u32>> {
        let mut matched = Vec::new();
        for &item in items {
            if self.ctx.storage.is_job_node_existed(&path(item)).await? {
                matched.push(item);
            }
        }
        Ok(matched)
    }
}
