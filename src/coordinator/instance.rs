//! Job instances and their liveness nodes

use std::cmp::Ordering;
use std::fmt;

use super::server::ServerService;
use super::ServiceContext;
use crate::error::Result;
use crate::node::InstanceNode;

/// Separator between IP and token in an instance id
pub const JOB_INSTANCE_DELIMITER: &str = "@-@";

/// Operation code an operator writes into an instance node to fire it once
pub const TRIGGER_OPERATION: &str = "TRIGGER";

// ============================================================================
// Job Instance
// ============================================================================

/// One process participating in a job, identified as `<ip>@-@<token>`
///
/// Instances order by their id string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobInstance {
    ip: String,
    token: String,
    id: String,
}

impl JobInstance {
    pub fn new(ip: impl Into<String>, token: impl Into<String>) -> Self {
        let ip = ip.into();
        let token = token.into();
        let id = format!("{ip}{JOB_INSTANCE_DELIMITER}{token}");
        Self { ip, token, id }
    }

    /// Instance for this process, using the OS process id as token
    pub fn local(ip: impl Into<String>) -> Self {
        Self::new(ip, std::process::id().to_string())
    }

    /// Parse an instance id
    pub fn from_id(id: &str) -> Option<Self> {
        let (ip, token) = id.split_once(JOB_INSTANCE_DELIMITER)?;
        if ip.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self::new(ip, token))
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialOrd for JobInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

// ============================================================================
// Instance Service
// ============================================================================

/// Instance liveness bookkeeping for one job
#[derive(Debug, Clone)]
pub struct InstanceService {
    ctx: ServiceContext,
    server: ServerService,
}

impl InstanceService {
    pub fn new(ctx: ServiceContext, server: ServerService) -> Self {
        Self { ctx, server }
    }

    fn local_path(&self) -> String {
        InstanceNode::instance_path(self.ctx.instance().id())
    }

    /// Write the local liveness node
    pub async fn persist_online(&self) -> Result<()> {
        self.ctx
            .storage
            .fill_ephemeral_job_node(&self.local_path(), "")
            .await?;
        tracing::debug!(
            job = self.ctx.job_name(),
            instance = %self.ctx.instance(),
            "Instance online"
        );
        Ok(())
    }

    pub async fn remove_instance(&self) -> Result<()> {
        self.ctx
            .storage
            .remove_job_node_if_existed(&self.local_path())
            .await
    }

    pub async fn is_local_instance_existed(&self) -> Result<bool> {
        self.is_instance_alive(self.ctx.instance().id()).await
    }

    pub async fn is_instance_alive(&self, instance_id: &str) -> Result<bool> {
        self.ctx
            .storage
            .is_job_node_existed(&InstanceNode::instance_path(instance_id))
            .await
    }

    /// Reset the local instance node after a trigger request was consumed
    pub async fn clear_trigger_flag(&self) -> Result<()> {
        let path = self.local_path();
        if self.ctx.storage.is_job_node_existed(&path).await? {
            self.ctx.storage.update_job_node(&path, "").await?;
        }
        Ok(())
    }

    /// Ids of every live instance, sorted ascending
    pub async fn get_live_instance_ids(&self) -> Result<Vec<String>> {
        self.ctx
            .storage
            .get_job_node_children_keys(InstanceNode::ROOT)
            .await
    }

    /// Live instances whose server is enabled, sorted by id
    pub async fn get_available_job_instances(&self) -> Result<Vec<JobInstance>> {
        let mut available = Vec::new();
        for id in self.get_live_instance_ids().await? {
            let Some(instance) = JobInstance::from_id(&id) else {
                tracing::warn!(job = self.ctx.job_name(), %id, "Ignoring malformed instance node");
                continue;
            };
            if self.server.is_enable_server(instance.ip()).await? {
                available.push(instance);
            }
        }
        available.sort();
        Ok(available)
    }

    /// Operator helper: ask every live instance to fire once
    pub async fn trigger_all_instances(&self) -> Result<()> {
        for id in self.get_live_instance_ids().await? {
            let path = InstanceNode::instance_path(&id);
            // The instance may vanish between listing and update
            if let Err(e) = self.ctx.storage.update_job_node(&path, TRIGGER_OPERATION).await {
                tracing::debug!(job = self.ctx.job_name(), %id, error = %e, "Skipping trigger");
            }
        }
        Ok(())
    }
}
