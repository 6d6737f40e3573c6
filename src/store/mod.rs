//! Coordination store abstraction
//!
//! The engine keeps all shared state in a hierarchical key/value tree that
//! offers persistent and ephemeral nodes, sequential nodes, change
//! notifications and a distributed mutex (ZooKeeper-like semantics).
//! [`CoordinationStore`] is the seam; [`memory::MemoryStore`] is an
//! in-process backend used for local clusters and tests.
//!
//! # Semantics
//!
//! - Paths are absolute (`/job/sharding/0/instance`); parents are created
//!   implicitly as empty persistent nodes.
//! - Ephemeral nodes belong to the writer's session and disappear together
//!   when the session ends.
//! - `remove` deletes a node together with all of its descendants.
//! - `transaction` applies every operation or none of them.

pub mod error;
pub mod event;
pub mod lock;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

pub use error::{StoreError, StoreResult};
pub use event::{ConnectionState, StoreEvent, StoreSubscription, TreeEvent, TreeEventKind};
pub use lock::with_lock;
pub use memory::{MemoryCluster, MemoryStore};

/// One step of an all-or-nothing transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
    /// Fail the transaction unless the node exists
    CheckExists(String),
    /// Create a persistent node; fails if it exists
    Create { path: String, value: String },
    /// Create or overwrite a persistent node
    Put { path: String, value: String },
    /// Delete a node; fails if it is missing
    Delete(String),
}

impl TransactionOp {
    /// Path this operation targets
    pub fn path(&self) -> &str {
        match self {
            Self::CheckExists(path) | Self::Delete(path) => path,
            Self::Create { path, .. } | Self::Put { path, .. } => path,
        }
    }

    /// Same operation re-targeted at another path
    pub fn with_path(self, path: String) -> Self {
        match self {
            Self::CheckExists(_) => Self::CheckExists(path),
            Self::Delete(_) => Self::Delete(path),
            Self::Create { value, .. } => Self::Create { path, value },
            Self::Put { value, .. } => Self::Put { path, value },
        }
    }
}

/// Proof of a held distributed lock
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LockToken {
    id: Uuid,
    name: String,
}

impl LockToken {
    /// Create a token for the lock `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// Unique token id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Client of a hierarchical coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a node value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Check whether a node exists
    async fn is_existed(&self, key: &str) -> StoreResult<bool>;

    /// Names of the direct children of a node, sorted ascending
    async fn get_children_keys(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Create or overwrite a persistent node
    async fn persist(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Overwrite an existing node
    async fn update(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Create or replace an ephemeral node owned by this client's session
    async fn persist_ephemeral(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Create a persistent sequential node, returning its full path
    async fn persist_sequential(&self, key: &str, value: &str) -> StoreResult<String>;

    /// Create an ephemeral sequential node, returning its full path
    async fn persist_ephemeral_sequential(&self, key: &str) -> StoreResult<String>;

    /// Remove a node and all of its descendants; missing nodes are ignored
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Current time according to the store
    async fn server_time(&self) -> StoreResult<DateTime<Utc>>;

    /// Apply all operations atomically
    async fn transaction(&self, ops: Vec<TransactionOp>) -> StoreResult<()>;

    /// Acquire the named distributed mutex, `None` on timeout
    async fn acquire_lock(&self, name: &str, timeout: Duration) -> StoreResult<Option<LockToken>>;

    /// Release a lock obtained from [`CoordinationStore::acquire_lock`]
    async fn release_lock(&self, token: LockToken) -> StoreResult<()>;

    /// Subscribe to tree and connection changes
    fn subscribe(&self) -> StoreSubscription;
}

/// Parent of an absolute path, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Validate an absolute node path
pub fn validate_path(path: &str) -> StoreResult<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath {
            path: path.to_string(),
        })
    }
}
