//! Leader election
//!
//! The leader is the instance whose id sits in the ephemeral
//! `leader/election/host` node. Election runs under the job's distributed
//! mutex: the mutex provides exclusivity, the ephemeral node provides
//! liveness (it vanishes with the leader's session).

use super::server::ServerService;
use super::ServiceContext;
use crate::error::{Error, Result};
use crate::node::LeaderNode;

/// Leader election for one job
#[derive(Debug, Clone)]
pub struct LeaderService {
    ctx: ServiceContext,
    server: ServerService,
}

impl LeaderService {
    pub fn new(ctx: ServiceContext, server: ServerService) -> Self {
        Self { ctx, server }
    }

    /// Elect this instance if no leader exists and the local server is
    /// available
    ///
    /// A lock timeout is not an error; the next leader-removed event or
    /// trigger retries.
    pub async fn elect_leader(&self) -> Result<()> {
        let storage = &self.ctx.storage;
        let result = storage
            .execute_in_leader(LeaderNode::ELECTION_LATCH, || async {
                if self.has_leader().await? {
                    return Ok(());
                }
                if self.ctx.handle.is_shutdown() || !self.server.is_local_server_available().await? {
                    tracing::debug!(job = self.ctx.job_name(), "Not eligible for leadership");
                    return Ok(());
                }

                let id = self.ctx.instance().id();
                storage
                    .fill_ephemeral_job_node(LeaderNode::ELECTION_HOST, id)
                    .await?;
                tracing::info!(job = self.ctx.job_name(), leader = id, "Elected as leader");
                Ok(())
            })
            .await;

        match result {
            Err(e @ Error::LockTimeout { .. }) => {
                tracing::warn!(job = self.ctx.job_name(), error = %e, "Leader election skipped");
                Ok(())
            }
            other => other,
        }
    }

    /// Whether this instance currently holds leadership
    pub async fn is_leader(&self) -> Result<bool> {
        if self.ctx.handle.is_shutdown() {
            return Ok(false);
        }
        self.is_leader_host().await
    }

    /// Wait (bounded) for a leader to exist, then report whether it is us
    ///
    /// While no leader exists and some server is available, each poll
    /// attempts an election if the local server is available.
    pub async fn is_leader_until_block(&self) -> Result<bool> {
        let timeout = self.ctx.settings.leader_wait_timeout();
        let settled = self
            .ctx
            .wait_until(timeout, || async {
                if self.has_leader().await? || !self.server.has_available_servers().await? {
                    return Ok(true);
                }
                if self.server.is_local_server_available().await? {
                    self.elect_leader().await?;
                }
                Ok(self.has_leader().await?)
            })
            .await?;

        if !settled {
            tracing::warn!(
                job = self.ctx.job_name(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for a leader"
            );
        }
        self.is_leader().await
    }

    pub async fn has_leader(&self) -> Result<bool> {
        self.ctx
            .storage
            .is_job_node_existed(LeaderNode::ELECTION_HOST)
            .await
    }

    /// Current leader id
    pub async fn get_leader_id(&self) -> Result<Option<String>> {
        self.ctx
            .storage
            .get_job_node_data(LeaderNode::ELECTION_HOST)
            .await
    }

    /// Give up leadership if this instance holds it
    ///
    /// Checks the token directly so it still works once shutdown is flagged.
    pub async fn remove_leadership(&self) -> Result<()> {
        if self.is_leader_host().await? {
            self.ctx
                .storage
                .remove_job_node_if_existed(LeaderNode::ELECTION_HOST)
                .await?;
            tracing::info!(job = self.ctx.job_name(), "Leadership released");
        }
        Ok(())
    }

    /// Drop whatever token exists and run a fresh election
    pub async fn force_reelect(&self) -> Result<()> {
        self.ctx
            .storage
            .remove_job_node_if_existed(LeaderNode::ELECTION_HOST)
            .await?;
        self.elect_leader().await
    }

    async fn is_leader_host(&self) -> Result<bool> {
        Ok(self
            .get_leader_id()
            .await?
            .is_some_and(|id| id == self.ctx.instance().id()))
    }
}
