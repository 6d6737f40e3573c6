//! Job-scoped access to the coordination store
//!
//! [`JobNodeStorage`] resolves relative node paths against the job root so
//! services never build absolute paths themselves.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::JobNodePath;
use crate::error::Result;
use crate::store::{with_lock, CoordinationStore, StoreSubscription, TransactionOp};

/// Store access bound to one job
#[derive(Clone)]
pub struct JobNodeStorage {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    lock_timeout: Duration,
}

impl JobNodeStorage {
    /// Bind `store` to `job_name`; distributed locks wait at most `lock_timeout`
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        job_name: impl Into<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
            lock_timeout,
        }
    }

    /// Job name
    pub fn job_name(&self) -> &str {
        self.path.job_name()
    }

    /// Path mapper for this job
    pub fn node_path(&self) -> &JobNodePath {
        &self.path
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub async fn is_job_node_existed(&self, relative: &str) -> Result<bool> {
        Ok(self.store.is_existed(&self.path.full_path(relative)).await?)
    }

    pub async fn is_job_root_node_existed(&self) -> Result<bool> {
        Ok(self.store.is_existed(self.path.root()).await?)
    }

    pub async fn get_job_node_data(&self, relative: &str) -> Result<Option<String>> {
        Ok(self.store.get(&self.path.full_path(relative)).await?)
    }

    pub async fn get_job_node_children_keys(&self, relative: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_children_keys(&self.path.full_path(relative))
            .await?)
    }

    /// Create an empty persistent node unless it already exists
    pub async fn create_job_node_if_needed(&self, relative: &str) -> Result<()> {
        let full = self.path.full_path(relative);
        if !self.store.is_existed(&full).await? {
            self.store.persist(&full, "").await?;
        }
        Ok(())
    }

    pub async fn remove_job_node_if_existed(&self, relative: &str) -> Result<()> {
        let full = self.path.full_path(relative);
        if self.store.is_existed(&full).await? {
            self.store.remove(&full).await?;
        }
        Ok(())
    }

    /// Create or overwrite a persistent node
    pub async fn fill_job_node(&self, relative: &str, value: &str) -> Result<()> {
        Ok(self.store.persist(&self.path.full_path(relative), value).await?)
    }

    /// Create or replace an ephemeral node of this session
    pub async fn fill_ephemeral_job_node(&self, relative: &str, value: &str) -> Result<()> {
        Ok(self
            .store
            .persist_ephemeral(&self.path.full_path(relative), value)
            .await?)
    }

    /// Overwrite an existing node
    pub async fn update_job_node(&self, relative: &str, value: &str) -> Result<()> {
        Ok(self.store.update(&self.path.full_path(relative), value).await?)
    }

    /// Apply operations on relative paths in one all-or-nothing transaction
    pub async fn execute_in_transaction(&self, ops: Vec<TransactionOp>) -> Result<()> {
        let ops = ops
            .into_iter()
            .map(|op| {
                let full = self.path.full_path(op.path());
                op.with_path(full)
            })
            .collect();
        Ok(self.store.transaction(ops).await?)
    }

    /// Run `operation` while holding the job-scoped mutex `latch`
    pub async fn execute_in_leader<T, F, Fut>(&self, latch: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = self.path.full_path(latch);
        with_lock(self.store.as_ref(), &name, self.lock_timeout, operation).await
    }

    /// Current time of the coordination store
    pub async fn get_registry_center_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.store.server_time().await?)
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> StoreSubscription {
        self.store.subscribe()
    }
}

impl std::fmt::Debug for JobNodeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobNodeStorage")
            .field("job_name", &self.path.job_name())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryCluster;

    fn storage(cluster: &MemoryCluster) -> JobNodeStorage {
        JobNodeStorage::new(cluster.connect(), "billing", Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_relative_paths_resolve_under_job_root() {
        let cluster = MemoryCluster::new();
        let storage = storage(&cluster);

        storage.fill_job_node("servers/10.0.0.1", "").await.unwrap();
        assert!(storage.is_job_root_node_existed().await.unwrap());
        assert!(cluster.snapshot().contains_key("/billing/servers/10.0.0.1"));
        assert_eq!(
            storage.get_job_node_children_keys("servers").await.unwrap(),
            vec!["10.0.0.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_if_needed_keeps_existing_value() {
        let cluster = MemoryCluster::new();
        let storage = storage(&cluster);

        storage.fill_job_node("config", "{}").await.unwrap();
        storage.create_job_node_if_needed("config").await.unwrap();
        assert_eq!(
            storage.get_job_node_data("config").await.unwrap().as_deref(),
            Some("{}")
        );

        storage.remove_job_node_if_existed("config").await.unwrap();
        storage.remove_job_node_if_existed("config").await.unwrap();
        assert!(!storage.is_job_node_existed("config").await.unwrap());
    }

    #[tokio::test]
    async fn test_transaction_uses_relative_paths() {
        let cluster = MemoryCluster::new();
        let storage = storage(&cluster);

        storage.fill_job_node("leader/sharding/necessary", "").await.unwrap();
        storage
            .execute_in_transaction(vec![
                TransactionOp::Put {
                    path: "sharding/0/instance".to_string(),
                    value: "a".to_string(),
                },
                TransactionOp::Delete("leader/sharding/necessary".to_string()),
            ])
            .await
            .unwrap();

        let snapshot = cluster.snapshot();
        assert_eq!(snapshot.get("/billing/sharding/0/instance").map(String::as_str), Some("a"));
        assert!(!snapshot.contains_key("/billing/leader/sharding/necessary"));
    }

    #[tokio::test]
    async fn test_execute_in_leader_excludes_other_sessions() {
        let cluster = MemoryCluster::new();
        let first = storage(&cluster);
        let second = storage(&cluster);

        let result = first
            .execute_in_leader("leader/election/latch", || async {
                second
                    .execute_in_leader("leader/election/latch", || async { Ok(()) })
                    .await
            })
            .await;

        assert!(matches!(result, Err(Error::LockTimeout { .. })));
    }
}
