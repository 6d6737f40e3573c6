//! Store event handling for one job
//!
//! Raw store events are classified into [`JobEvent`]s relative to the job
//! subtree; anything outside the subtree or without a reaction is dropped.
//! One task per job applies the reactions in arrival order.

use std::sync::Arc;
use tokio::task::JoinHandle;

use super::instance::TRIGGER_OPERATION;
use super::server::ServerStatus;
use super::JobServices;
use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::node::{InstanceNode, JobNodePath, LeaderNode, ServerNode, CONFIG_NODE};
use crate::store::{ConnectionState, StoreEvent, TreeEventKind};
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Job Events
// ============================================================================

/// A store change the job reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The leadership token vanished
    LeaderRemoved,
    /// An instance came online
    InstanceAdded(String),
    /// An instance went away
    InstanceRemoved(String),
    /// An operator asked an instance to fire once
    InstanceTriggered(String),
    /// A server registered or its status changed
    ServerChanged { ip: String, status: ServerStatus },
    /// The job configuration was written
    ConfigChanged(String),
    /// The store connection was lost
    ConnectionLost,
    /// The store connection came back
    Reconnected,
}

impl JobEvent {
    /// Map a store event onto a job event, `None` if the job does not care
    pub fn classify(path: &JobNodePath, event: &StoreEvent) -> Option<Self> {
        let tree = match event {
            StoreEvent::Connection(ConnectionState::Lost) => return Some(Self::ConnectionLost),
            StoreEvent::Connection(ConnectionState::Reconnected) => return Some(Self::Reconnected),
            StoreEvent::Connection(ConnectionState::Connected) => return None,
            StoreEvent::Tree(tree) => tree,
        };
        let relative = path.to_relative(&tree.path)?;

        if LeaderNode::is_leader_host_path(relative) {
            return (tree.kind == TreeEventKind::Removed).then_some(Self::LeaderRemoved);
        }
        if let Some(id) = InstanceNode::instance_id(relative) {
            return match tree.kind {
                TreeEventKind::Added => Some(Self::InstanceAdded(id.to_string())),
                TreeEventKind::Removed => Some(Self::InstanceRemoved(id.to_string())),
                TreeEventKind::Updated if tree.data == TRIGGER_OPERATION => {
                    Some(Self::InstanceTriggered(id.to_string()))
                }
                TreeEventKind::Updated => None,
            };
        }
        if let Some(ip) = ServerNode::server_ip(relative) {
            return (tree.kind != TreeEventKind::Removed).then(|| Self::ServerChanged {
                ip: ip.to_string(),
                status: ServerStatus::parse(&tree.data),
            });
        }
        if relative == CONFIG_NODE && tree.kind != TreeEventKind::Removed {
            return Some(Self::ConfigChanged(tree.data.clone()));
        }
        None
    }
}

// ============================================================================
// Listener Manager
// ============================================================================

/// Applies job events to the local services
#[derive(Debug, Clone)]
pub struct ListenerManager {
    services: Arc<JobServices>,
}

impl ListenerManager {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self { services }
    }

    /// Subscribe and process events until the job shuts down
    ///
    /// The subscription is taken before returning, so changes made after
    /// `start` are never missed.
    pub fn start(self) -> JoinHandle<()> {
        let storage = &self.services.context.storage;
        let mut subscription = storage.subscribe();
        let path = storage.node_path().clone();
        let stopped = self.services.handle().stopped();

        tokio::spawn(async move {
            tokio::pin!(stopped);
            loop {
                let event = tokio::select! {
                    () = &mut stopped => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(job_event) = JobEvent::classify(&path, &event) else {
                    continue;
                };
                if let Err(e) = self.handle_event(job_event.clone()).await {
                    tracing::warn!(
                        job = self.services.job_name(),
                        event = ?job_event,
                        error = %e,
                        "Failed to handle job event"
                    );
                }
            }
            tracing::debug!(job = self.services.job_name(), "Listener stopped");
        })
    }

    /// Apply the reaction for one event
    pub async fn handle_event(&self, event: JobEvent) -> Result<()> {
        let services = &self.services;
        let handle = services.handle();
        if handle.is_shutdown() {
            return Ok(());
        }

        match event {
            JobEvent::LeaderRemoved => services.leader.elect_leader().await,
            JobEvent::InstanceAdded(_) => services.sharding.set_resharding_flag().await,
            JobEvent::InstanceRemoved(id) if id == handle.instance().id() => {
                self.on_local_instance_removed().await
            }
            JobEvent::InstanceRemoved(id) => {
                services.sharding.set_resharding_flag().await?;
                services.failover.on_instance_crashed(&id).await
            }
            JobEvent::InstanceTriggered(id) => {
                if id == handle.instance().id() {
                    services.instance.clear_trigger_flag().await?;
                    handle.trigger().trigger_now();
                }
                Ok(())
            }
            JobEvent::ServerChanged { ip, status } => {
                services.sharding.set_resharding_flag().await?;
                if ip == handle.instance().ip() && !status.is_enabled() {
                    services.leader.remove_leadership().await?;
                }
                Ok(())
            }
            JobEvent::ConfigChanged(data) => self.on_config_changed(&data).await,
            JobEvent::ConnectionLost => {
                handle.set_paused(true);
                tracing::warn!(job = services.job_name(), "Store connection lost, job paused");
                Ok(())
            }
            JobEvent::Reconnected => self.on_reconnected().await,
        }
    }

    async fn on_local_instance_removed(&self) -> Result<()> {
        let services = &self.services;
        // Expected while paused, and a stale event once re-registered
        if services.handle().is_paused() || services.instance.is_local_instance_existed().await? {
            return Ok(());
        }
        tracing::warn!(
            job = services.job_name(),
            "Instance registration removed externally, shutting down"
        );
        services.force_shutdown().await;
        Ok(())
    }

    async fn on_config_changed(&self, data: &str) -> Result<()> {
        let services = &self.services;
        let config = JobConfig::from_json(data)?;
        let handle = services.handle();

        let current = handle.sharding_total_count();
        if current != 0 && current != config.sharding_total_count {
            tracing::info!(
                job = services.job_name(),
                from = current,
                to = config.sharding_total_count,
                "Sharding total count changed"
            );
            handle.set_sharding_total_count(config.sharding_total_count);
            services.sharding.set_resharding_flag().await?;
        }
        if !config.failover {
            services.failover.remove_failover_info().await?;
        }
        Ok(())
    }

    async fn on_reconnected(&self) -> Result<()> {
        let services = &self.services;
        let ip = services.handle().instance().ip();

        with_retry_if(
            &RetryConfig::default(),
            || async {
                if services.server.get_status(ip).await?.is_none() {
                    let config = services.config.load().await?;
                    services.server.persist_online(!config.disabled).await?;
                }
                services.instance.persist_online().await
            },
            Error::is_recoverable,
        )
        .await?;
        services.execution.clear_local_running_info().await?;
        services.handle().set_paused(false);
        services.leader.elect_leader().await?;

        tracing::info!(job = services.job_name(), "Store connection restored, job resumed");
        Ok(())
    }
}
