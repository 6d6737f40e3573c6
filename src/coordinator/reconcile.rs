//! Periodic consistency check run by the leader
//!
//! Store notifications can be lost across reconnects. Every interval the
//! leader checks for items still owned by instances that are gone and, if it
//! finds any, raises the resharding flag.

use std::time::Duration;
use tokio::task::JoinHandle;

use super::leader::LeaderService;
use super::sharding::ShardingService;
use super::ServiceContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReconcileService {
    ctx: ServiceContext,
    leader: LeaderService,
    sharding: ShardingService,
}

impl ReconcileService {
    pub fn new(ctx: ServiceContext, leader: LeaderService, sharding: ShardingService) -> Self {
        Self {
            ctx,
            leader,
            sharding,
        }
    }

    /// One reconciliation pass, returns whether resharding was requested
    pub async fn reconcile_once(&self) -> Result<bool> {
        if !self.leader.is_leader().await?
            || self.sharding.is_need_sharding().await?
            || !self.sharding.has_sharding_info_in_offline_servers().await?
        {
            return Ok(false);
        }

        tracing::warn!(
            job = self.ctx.job_name(),
            "Items owned by offline instances, requesting resharding"
        );
        self.sharding.set_resharding_flag().await?;
        Ok(true)
    }

    /// Run `reconcile_once` every `interval` until the job shuts down
    pub fn start(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let stopped = self.ctx.handle.stopped();
            tokio::pin!(stopped);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile_once().await {
                            tracing::warn!(job = self.ctx.job_name(), error = %e, "Reconcile failed");
                        }
                    }
                }
            }
            tracing::debug!(job = self.ctx.job_name(), "Reconcile loop stopped");
        })
    }
}
