//! Node-path schema of a job's coordination tree
//!
//! Every job owns the subtree `/<job_name>`:
//!
//! ```text
//! /<job>/config                        job configuration (JSON)
//! /<job>/leader/election/host          ephemeral, leader instance id
//! /<job>/leader/election/latch         mutex for election and resharding
//! /<job>/leader/sharding/necessary     resharding flag
//! /<job>/leader/sharding/processing    ephemeral, reshard in progress
//! /<job>/leader/failover/latch         mutex for failover claims
//! /<job>/servers/<ip>                  "" | DISABLED | PAUSED
//! /<job>/servers/<ip>/hostName         resolved host name
//! /<job>/instances/<ip>@-@<token>      ephemeral liveness, "" | TRIGGER
//! /<job>/sharding/<item>/instance      owning instance id
//! /<job>/sharding/<item>/running       ephemeral, owner id while executing
//! /<job>/sharding/<item>/completed     last completion record
//! /<job>/sharding/<item>/misfire       pending misfire
//! /<job>/sharding/<item>/disabled      operator-disabled item
//! /<job>/sharding/<item>/failover      pending failover, crashed owner id
//! /<job>/sharding/<item>/failovering   ephemeral, failover claimant id
//! ```
//!
//! Services address nodes by their path relative to the job root; the
//! helpers below build those relative paths.

pub mod storage;

pub use storage::JobNodeStorage;

/// Relative path of the configuration node
pub const CONFIG_NODE: &str = "config";

/// Maps relative node paths onto a job's absolute subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNodePath {
    job_name: String,
    root: String,
}

impl JobNodePath {
    /// Create the path mapper for `job_name`
    pub fn new(job_name: impl Into<String>) -> Self {
        let job_name = job_name.into();
        let root = format!("/{job_name}");
        Self { job_name, root }
    }

    /// Job name
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Absolute root of the job subtree
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Absolute path of a relative node
    pub fn full_path(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root, relative)
        }
    }

    /// Relative path of an absolute node, `None` outside the job subtree
    pub fn to_relative<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(self.root.as_str())?.strip_prefix('/')
    }
}

// ============================================================================
// Per-concept node helpers
// ============================================================================

/// Leader election and resharding flags
pub struct LeaderNode;

impl LeaderNode {
    pub const ROOT: &'static str = "leader";
    pub const ELECTION_HOST: &'static str = "leader/election/host";
    pub const ELECTION_LATCH: &'static str = "leader/election/latch";
    pub const SHARDING_NECESSARY: &'static str = "leader/sharding/necessary";
    pub const SHARDING_PROCESSING: &'static str = "leader/sharding/processing";
    pub const FAILOVER_LATCH: &'static str = "leader/failover/latch";

    /// Whether a relative path is the leadership token
    pub fn is_leader_host_path(relative: &str) -> bool {
        relative == Self::ELECTION_HOST
    }
}

/// Server registration nodes
pub struct ServerNode;

impl ServerNode {
    pub const ROOT: &'static str = "servers";
    pub const HOST_NAME: &'static str = "hostName";

    /// `servers/<ip>`
    pub fn server_path(ip: &str) -> String {
        format!("{}/{}", Self::ROOT, ip)
    }

    /// `servers/<ip>/hostName`
    pub fn host_name_path(ip: &str) -> String {
        format!("{}/{}/{}", Self::ROOT, ip, Self::HOST_NAME)
    }

    /// Server IP of a `servers/<ip>` path, `None` for other paths
    pub fn server_ip(relative: &str) -> Option<&str> {
        let ip = relative.strip_prefix(Self::ROOT)?.strip_prefix('/')?;
        (!ip.is_empty() && !ip.contains('/')).then_some(ip)
    }
}

/// Instance liveness nodes
pub struct InstanceNode;

impl InstanceNode {
    pub const ROOT: &'static str = "instances";

    /// `instances/<id>`
    pub fn instance_path(instance_id: &str) -> String {
        format!("{}/{}", Self::ROOT, instance_id)
    }

    /// Instance id of an `instances/<id>` path, `None` for other paths
    pub fn instance_id(relative: &str) -> Option<&str> {
        let id = relative.strip_prefix(Self::ROOT)?.strip_prefix('/')?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

/// Per-item sharding and execution nodes
pub struct ShardingNode;

impl ShardingNode {
    pub const ROOT: &'static str = "sharding";

    /// `sharding/<item>`
    pub fn item_path(item: u32) -> String {
        format!("{}/{}", Self::ROOT, item)
    }

    /// `sharding/<item>/instance`
    pub fn instance_path(item: u32) -> String {
        Self::child(item, "instance")
    }

    /// `sharding/<item>/running`
    pub fn running_path(item: u32) -> String {
        Self::child(item, "running")
    }

    /// `sharding/<item>/completed`
    pub fn completed_path(item: u32) -> String {
        Self::child(item, "completed")
    }

    /// `sharding/<item>/misfire`
    pub fn misfire_path(item: u32) -> String {
        Self::child(item, "misfire")
    }

    /// `sharding/<item>/disabled`
    pub fn disabled_path(item: u32) -> String {
        Self::child(item, "disabled")
    }

    /// `sharding/<item>/failover`
    pub fn failover_path(item: u32) -> String {
        Self::child(item, "failover")
    }

    /// `sharding/<item>/failovering`
    pub fn failovering_path(item: u32) -> String {
        Self::child(item, "failovering")
    }

    /// Item number of a `sharding/<item>` path
    pub fn item(relative: &str) -> Option<u32> {
        let rest = relative.strip_prefix(Self::ROOT)?.strip_prefix('/')?;
        rest.split('/').next()?.parse().ok()
    }

    fn child(item: u32, name: &str) -> String {
        format!("{}/{}/{}", Self::ROOT, item, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_relative_paths() {
        let path = JobNodePath::new("billing");

        assert_eq!(path.root(), "/billing");
        assert_eq!(path.full_path("config"), "/billing/config");
        assert_eq!(path.full_path(""), "/billing");
        assert_eq!(path.to_relative("/billing/leader/election/host"), Some("leader/election/host"));
        assert_eq!(path.to_relative("/billing2/config"), None);
        assert_eq!(path.to_relative("/billing"), None);
    }

    #[test]
    fn test_server_ip_extraction() {
        assert_eq!(ServerNode::server_ip("servers/10.0.0.1"), Some("10.0.0.1"));
        assert_eq!(ServerNode::server_ip("servers/10.0.0.1/hostName"), None);
        assert_eq!(ServerNode::server_ip("servers"), None);
        assert_eq!(ServerNode::host_name_path("10.0.0.1"), "servers/10.0.0.1/hostName");
    }

    #[test]
    fn test_instance_id_extraction() {
        assert_eq!(
            InstanceNode::instance_id("instances/10.0.0.1@-@42"),
            Some("10.0.0.1@-@42")
        );
        assert_eq!(InstanceNode::instance_id("instances/"), None);
        assert_eq!(InstanceNode::instance_id("servers/10.0.0.1"), None);
    }

    #[test]
    fn test_sharding_paths() {
        assert_eq!(ShardingNode::running_path(3), "sharding/3/running");
        assert_eq!(ShardingNode::failovering_path(0), "sharding/0/failovering");
        assert_eq!(ShardingNode::item("sharding/12/misfire"), Some(12));
        assert_eq!(ShardingNode::item("sharding/x"), None);
    }
}
