//! Server registration and availability
//!
//! A server is a host identified by IP. Its node is persistent and survives
//! every instance on it; operators mark it disabled or paused by writing the
//! node value.

use super::instance::JOB_INSTANCE_DELIMITER;
use super::ServiceContext;
use crate::error::Result;
use crate::node::{InstanceNode, ServerNode};
use crate::utils::local_host_name;

// ============================================================================
// Server Status
// ============================================================================

/// Operator-controlled status stored in `servers/<ip>`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    /// Accepts work (`""`)
    #[default]
    Enabled,
    /// Operator-disabled (`DISABLED`)
    Disabled,
    /// Operator-paused (`PAUSED`)
    Paused,
}

impl ServerStatus {
    /// Node value for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "",
            Self::Disabled => "DISABLED",
            Self::Paused => "PAUSED",
        }
    }

    /// Parse a node value; unknown values count as enabled
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "DISABLED" => Self::Disabled,
            "PAUSED" => Self::Paused,
            _ => Self::Enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self == Self::Enabled
    }
}

// ============================================================================
// Server Service
// ============================================================================

/// Server bookkeeping for one job
#[derive(Debug, Clone)]
pub struct ServerService {
    ctx: ServiceContext,
}

impl ServerService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn local_ip(&self) -> &str {
        self.ctx.instance().ip()
    }

    /// Register the local server, enabled or disabled
    pub async fn persist_online(&self, enabled: bool) -> Result<()> {
        let ip = self.local_ip();
        let status = if enabled {
            ServerStatus::Enabled
        } else {
            ServerStatus::Disabled
        };
        let storage = &self.ctx.storage;

        storage
            .fill_job_node(&ServerNode::server_path(ip), status.as_str())
            .await?;

        let host_name_path = ServerNode::host_name_path(ip);
        if !storage.is_job_node_existed(&host_name_path).await? {
            storage
                .fill_job_node(&host_name_path, &local_host_name(ip))
                .await?;
        }

        tracing::debug!(job = self.ctx.job_name(), ip, ?status, "Server registered");
        Ok(())
    }

    /// Status of a server, `None` if it never registered
    pub async fn get_status(&self, ip: &str) -> Result<Option<ServerStatus>> {
        Ok(self
            .ctx
            .storage
            .get_job_node_data(&ServerNode::server_path(ip))
            .await?
            .map(|value| ServerStatus::parse(&value)))
    }

    /// Operator helper: change a server's status
    pub async fn set_status(&self, ip: &str, status: ServerStatus) -> Result<()> {
        self.ctx
            .storage
            .update_job_node(&ServerNode::server_path(ip), status.as_str())
            .await
    }

    /// Registered and neither disabled nor paused
    pub async fn is_enable_server(&self, ip: &str) -> Result<bool> {
        Ok(self
            .get_status(ip)
            .await?
            .is_some_and(|status| status.is_enabled()))
    }

    /// Enabled and running at least one live instance
    ///
    /// For the local server the process-local paused flag also counts.
    pub async fn is_available_server(&self, ip: &str) -> Result<bool> {
        if ip == self.local_ip() && self.ctx.handle.is_paused() {
            return Ok(false);
        }
        Ok(self.is_enable_server(ip).await? && self.has_online_instances(ip).await?)
    }

    pub async fn is_local_server_available(&self) -> Result<bool> {
        self.is_available_server(self.local_ip()).await
    }

    /// Available servers, sorted ascending
    pub async fn get_available_servers(&self) -> Result<Vec<String>> {
        let mut available = Vec::new();
        for ip in self
            .ctx
            .storage
            .get_job_node_children_keys(ServerNode::ROOT)
            .await?
        {
            if self.is_available_server(&ip).await? {
                available.push(ip);
            }
        }
        Ok(available)
    }

    pub async fn has_available_servers(&self) -> Result<bool> {
        Ok(!self.get_available_servers().await?.is_empty())
    }

    async fn has_online_instances(&self, ip: &str) -> Result<bool> {
        let prefix = format!("{ip}{JOB_INSTANCE_DELIMITER}");
        Ok(self
            .ctx
            .storage
            .get_job_node_children_keys(InstanceNode::ROOT)
            .await?
            .iter()
            .any(|id| id.starts_with(&prefix)))
    }
}
