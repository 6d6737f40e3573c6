//! Test fixtures for integration tests
//!
//! Provides a recording job and helpers to run several instances against
//! one in-memory cluster.

use async_trait::async_trait;
use shardkeeper::config::CoordinatorSettings;
use shardkeeper::coordinator::JobRegistry;
use shardkeeper::job::{JobBootstrap, ScheduledJob, ShardingContext, ShardingJob};
use shardkeeper::store::{CoordinationStore, MemoryCluster, MemoryStore};
use shardkeeper::JobConfig;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One recorded item execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub label: String,
    pub item: u32,
}

pub type ExecutionLog = Arc<Mutex<Vec<Execution>>>;

pub fn new_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Items executed by `label`, ascending and deduplicated
pub fn items_run_by(log: &ExecutionLog, label: &str) -> Vec<u32> {
    let mut items: Vec<u32> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.label == label)
        .map(|e| e.item)
        .collect();
    items.sort_unstable();
    items.dedup();
    items
}

/// Every item executed by anyone, ascending and deduplicated
pub fn items_run(log: &ExecutionLog) -> Vec<u32> {
    let mut items: Vec<u32> = log.lock().unwrap().iter().map(|e| e.item).collect();
    items.sort_unstable();
    items.dedup();
    items
}

/// Job that records every item it runs
pub struct RecordingJob {
    label: String,
    log: ExecutionLog,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingJob {
    pub fn new(label: &str, log: &ExecutionLog) -> Self {
        Self {
            label: label.to_string(),
            log: Arc::clone(log),
            gate: None,
        }
    }

    /// Each execution waits for one permit of `gate` before recording
    pub fn gated(label: &str, log: &ExecutionLog, gate: &Arc<Semaphore>) -> Self {
        Self {
            gate: Some(Arc::clone(gate)),
            ..Self::new(label, log)
        }
    }
}

#[async_trait]
impl ShardingJob for RecordingJob {
    async fn execute(&self, context: ShardingContext) -> anyhow::Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.log.lock().unwrap().push(Execution {
            label: self.label.clone(),
            item: context.sharding_item,
        });
        Ok(())
    }
}

pub fn settings(ip: &str) -> CoordinatorSettings {
    CoordinatorSettings {
        lock_timeout_ms: 1_000,
        leader_wait_timeout_ms: 1_000,
        sharding_wait_timeout_ms: 2_000,
        poll_interval_ms: 10,
        trigger_queue_capacity: 16,
        local_ip: Some(ip.to_string()),
    }
}

/// One instance of a job, with its own session and registry
pub struct Node {
    pub ip: String,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<JobRegistry>,
    pub job: ScheduledJob,
}

impl Node {
    pub fn id(&self) -> String {
        self.job.instance().id().to_string()
    }

    pub fn fire(&self) {
        self.job.trigger().trigger_now();
    }
}

pub async fn start_node(
    cluster: &MemoryCluster,
    config: &JobConfig,
    ip: &str,
    job: impl ShardingJob,
) -> Node {
    let store = cluster.connect();
    let registry = Arc::new(JobRegistry::new());
    let dyn_store: Arc<dyn CoordinationStore> = store.clone();
    let job = JobBootstrap::new(
        dyn_store,
        Arc::clone(&registry),
        settings(ip),
        config.clone(),
        Arc::new(job),
    )
    .start()
    .await
    .expect("job should start");

    Node {
        ip: ip.to_string(),
        store,
        registry,
        job,
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Let listeners drain the events of recent writes
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Item → owner id, read from the store
pub fn owners(cluster: &MemoryCluster, job: &str) -> BTreeMap<u32, String> {
    let prefix = format!("/{job}/sharding/");
    cluster
        .snapshot()
        .into_iter()
        .filter_map(|(path, value)| {
            let rest = path.strip_prefix(&prefix)?;
            let item = rest.strip_suffix("/instance")?.parse().ok()?;
            Some((item, value))
        })
        .collect()
}

/// Items owned by `id`, ascending
pub fn items_owned_by(cluster: &MemoryCluster, job: &str, id: &str) -> Vec<u32> {
    owners(cluster, job)
        .into_iter()
        .filter(|(_, owner)| owner == id)
        .map(|(item, _)| item)
        .collect()
}

pub fn leader_of(cluster: &MemoryCluster, job: &str) -> Option<String> {
    cluster
        .snapshot()
        .get(&format!("/{job}/leader/election/host"))
        .cloned()
}

pub fn resharding_pending(cluster: &MemoryCluster, job: &str) -> bool {
    cluster
        .snapshot()
        .contains_key(&format!("/{job}/leader/sharding/necessary"))
}
