//! Job runner
//!
//! Drains the trigger channel of one job. Each `Fire` spawns one execution
//! cycle:
//!
//! 1. environment check (clock drift)
//! 2. sharding contexts (resharding first if needed)
//! 3. misfire check against in-flight executions
//! 4. begin, per-item execution, completed
//! 5. replay while a misfire is pending
//! 6. failover claim
//!
//! Item failures are recorded in the completion record, never propagated.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::context::{ShardingContext, ShardingContexts};
use super::facade::JobFacade;
use super::trigger::TriggerCommand;
use crate::error::Result;

/// User job, invoked once per assigned item
#[async_trait]
pub trait ShardingJob: Send + Sync + 'static {
    async fn execute(&self, context: ShardingContext) -> anyhow::Result<()>;
}

pub struct JobRunner {
    facade: JobFacade,
    job: Arc<dyn ShardingJob>,
    triggers: mpsc::Receiver<TriggerCommand>,
}

impl JobRunner {
    pub fn new(
        facade: JobFacade,
        job: Arc<dyn ShardingJob>,
        triggers: mpsc::Receiver<TriggerCommand>,
    ) -> Self {
        Self {
            facade,
            job,
            triggers,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands until `Shutdown` or the job's shutdown signal, then
    /// wait for in-flight cycles
    pub async fn run(mut self) {
        let job_name = self.facade.job_name().to_string();
        let mut paused = false;
        let mut cycles = JoinSet::new();
        let stopped = self.facade.handle().stopped();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                () = &mut stopped => break,
                command = self.triggers.recv() => match command {
                    Some(TriggerCommand::Fire) => {
                        let handle = self.facade.handle();
                        if paused || handle.is_paused() || handle.is_shutdown() {
                            tracing::debug!(job = %job_name, "Fire ignored while paused");
                            continue;
                        }
                        cycles.spawn(Self::cycle(self.facade.clone(), Arc::clone(&self.job)));
                    }
                    Some(TriggerCommand::Pause) => paused = true,
                    Some(TriggerCommand::Resume) => paused = false,
                    Some(TriggerCommand::Shutdown) | None => break,
                },
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(job = %job_name, error = %e, "Execution cycle aborted");
                    }
                }
            }
        }

        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                tracing::error!(job = %job_name, error = %e, "Execution cycle aborted");
            }
        }
        tracing::info!(job = %job_name, "Job runner stopped");
    }

    async fn cycle(facade: JobFacade, job: Arc<dyn ShardingJob>) {
        if let Err(e) = Self::execute(&facade, &job).await {
            tracing::warn!(job = facade.job_name(), error = %e, "Execution cycle failed");
        }
    }

    /// Run one triggered execution
    pub async fn execute(facade: &JobFacade, job: &Arc<dyn ShardingJob>) -> Result<()> {
        facade.check_job_execution_environment().await?;

        let contexts = facade.get_sharding_contexts().await?;
        if contexts.is_empty() {
            tracing::debug!(job = facade.job_name(), "No items assigned, nothing to run");
            return Ok(());
        }

        let items = contexts.items();
        if facade.misfire_if_running(items).await? {
            tracing::info!(job = facade.job_name(), ?items, "Previous execution still running, misfired");
            return Ok(());
        }
        if !facade.handle().try_begin_run() {
            facade.misfire_if_running(items).await?;
            return Ok(());
        }

        let outcome = Self::run_with_replay(facade, job, &contexts).await;
        if outcome.is_err() {
            facade.handle().set_running(false);
        }
        outcome?;

        facade.failover_if_necessary().await
    }

    async fn run_with_replay(
        facade: &JobFacade,
        job: &Arc<dyn ShardingJob>,
        contexts: &ShardingContexts,
    ) -> Result<()> {
        Self::run_contexts(facade, job, contexts).await?;

        let items = contexts.items();
        while facade.is_execute_misfired(items).await? {
            if !facade.handle().try_begin_run() {
                break;
            }
            facade.clear_misfire(items).await?;
            tracing::info!(job = facade.job_name(), ?items, "Replaying misfired execution");
            Self::run_contexts(facade, job, contexts).await?;
        }
        Ok(())
    }

    async fn run_contexts(
        facade: &JobFacade,
        job: &Arc<dyn ShardingJob>,
        contexts: &ShardingContexts,
    ) -> Result<()> {
        facade.register_job_begin(contexts).await?;
        let errors = run_items(job, contexts).await;
        if !errors.is_empty() {
            tracing::warn!(
                job = facade.job_name(),
                task_id = contexts.task_id(),
                failed = ?errors.keys().collect::<Vec<_>>(),
                "Some items failed"
            );
        }
        facade.register_job_completed(contexts, &errors).await
    }
}

/// Execute every item concurrently and collect per-item failures
async fn run_items(job: &Arc<dyn ShardingJob>, contexts: &ShardingContexts) -> BTreeMap<u32, String> {
    let mut tasks = JoinSet::new();
    for &item in contexts.items() {
        let job = Arc::clone(job);
        let context = contexts.context_for(item);
        tasks.spawn(async move {
            let outcome = AssertUnwindSafe(job.execute(context)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(_) => Some("item execution panicked".to_string()),
            };
            (item, error)
        });
    }

    let mut errors = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((item, Some(error))) => {
                errors.insert(item, error);
            }
            Ok((_, None)) => {}
            Err(e) => tracing::error!(error = %e, "Item task aborted"),
        }
    }
    errors
}
