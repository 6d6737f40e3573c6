//! Process-local job registry
//!
//! One [`JobRegistry`] per process maps job names to the [`JobHandle`] of
//! the locally running job. The handle carries the flags services consult
//! on every decision (running, paused, shutdown) as atomics, plus the
//! trigger channel and a shutdown signal for background tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::instance::JobInstance;
use crate::error::{Error, Result};
use crate::job::trigger::TriggerHandle;

// ============================================================================
// Job Handle
// ============================================================================

/// Local state of one running job
#[derive(Debug)]
pub struct JobHandle {
    /// Identity of this process for the job
    instance: JobInstance,

    /// Trigger channel into the runner
    trigger: TriggerHandle,

    /// An execution is in flight locally
    running: AtomicBool,

    /// Paused by connection loss or operator
    paused: AtomicBool,

    /// Shutdown has begun
    shutdown: AtomicBool,

    /// Last known sharding total count
    sharding_total_count: AtomicU32,

    /// Wakes background tasks on shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl JobHandle {
    /// Create the handle for a freshly started job
    pub fn new(instance: JobInstance, trigger: TriggerHandle) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            instance,
            trigger,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            sharding_total_count: AtomicU32::new(0),
            shutdown_tx,
        }
    }

    pub fn instance(&self) -> &JobInstance {
        &self.instance
    }

    pub fn trigger(&self) -> &TriggerHandle {
        &self.trigger
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Atomically claim the local running flag, `false` if already set
    pub fn try_begin_run(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Flag shutdown and wake every task watching the signal
    ///
    /// Returns `false` when shutdown had already begun.
    pub fn mark_shutdown(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        first
    }

    /// Receiver that resolves once shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Future that completes once shutdown has begun, even if it already has
    pub fn stopped(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut signal = self.shutdown_tx.subscribe();
        async move {
            let _ = signal.wait_for(|stopped| *stopped).await;
        }
    }

    pub fn sharding_total_count(&self) -> u32 {
        self.sharding_total_count.load(Ordering::SeqCst)
    }

    pub fn set_sharding_total_count(&self, count: u32) {
        self.sharding_total_count.store(count, Ordering::SeqCst);
    }
}

// ============================================================================
// Job Registry
// ============================================================================

/// Registry of the jobs running in this process
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, failing if the name is already taken locally
    pub async fn register(&self, job_name: &str, handle: Arc<JobHandle>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_name) {
            return Err(Error::JobAlreadyRegistered(job_name.to_string()));
        }
        jobs.insert(job_name.to_string(), handle);
        tracing::debug!(job = job_name, "Job registered");
        Ok(())
    }

    /// Handle of a registered job
    pub async fn get(&self, job_name: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(job_name).cloned()
    }

    /// Local instance of a registered job
    pub async fn get_job_instance(&self, job_name: &str) -> Option<JobInstance> {
        self.get(job_name).await.map(|h| h.instance().clone())
    }

    /// Whether the job is executing locally
    pub async fn is_job_running(&self, job_name: &str) -> bool {
        self.get(job_name).await.is_some_and(|h| h.is_running())
    }

    /// Whether the job is shut down; unknown jobs count as shut down
    pub async fn is_shutdown(&self, job_name: &str) -> bool {
        self.get(job_name).await.map_or(true, |h| h.is_shutdown())
    }

    /// Names of all registered jobs, sorted
    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a job without signalling it
    pub async fn unregister(&self, job_name: &str) -> Option<Arc<JobHandle>> {
        self.jobs.write().await.remove(job_name)
    }

    /// Shut a job down and drop it from the registry
    ///
    /// Marks the handle, stops its runner and removes the entry. Calling it
    /// for an unknown job is a no-op returning [`Error::JobNotFound`].
    pub async fn shutdown(&self, job_name: &str) -> Result<()> {
        let handle = self
            .unregister(job_name)
            .await
            .ok_or_else(|| Error::JobNotFound(job_name.to_string()))?;

        handle.mark_shutdown();
        handle.trigger().shutdown();
        tracing::info!(job = job_name, "Job removed from registry");
        Ok(())
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let jobs = self.jobs.read().await;

        let mut stats = RegistryStats {
            total_jobs: jobs.len(),
            ..RegistryStats::default()
        };
        for handle in jobs.values() {
            if handle.is_running() {
                stats.running += 1;
            }
            if handle.is_paused() {
                stats.paused += 1;
            }
            if handle.is_shutdown() {
                stats.shutting_down += 1;
            }
        }
        stats
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_jobs: usize,
    pub running: usize,
    pub paused: usize,
    pub shutting_down: usize,
}
