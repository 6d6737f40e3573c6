//! Misfire handling and execution environment checks

use super::fixtures::*;
use shardkeeper::coordinator::JobRegistry;
use shardkeeper::job::JobBootstrap;
use shardkeeper::store::{CoordinationStore, MemoryCluster};
use shardkeeper::{Error, JobConfig};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_trigger_during_execution_is_replayed_once() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let gate = Arc::new(Semaphore::new(0));
    let config = JobConfig::builder("billing", "BillingJob", 1).build().unwrap();
    let a = start_node(&cluster, &config, "10.0.0.1", RecordingJob::gated("a", &log, &gate)).await;

    a.fire();
    wait_for("execution to start", || async { a.job.handle().is_running() }).await;

    a.fire();
    wait_for("misfire to be recorded", || async {
        cluster.snapshot().contains_key("/billing/sharding/0/misfire")
    })
    .await;

    gate.add_permits(2);
    wait_for("replayed execution", || async { log.lock().unwrap().len() == 2 }).await;
    wait_for("runner to go idle", || async { !a.job.handle().is_running() }).await;
    settle().await;

    assert_eq!(log.lock().unwrap().len(), 2);
    assert!(!cluster.snapshot().contains_key("/billing/sharding/0/misfire"));
}

#[tokio::test]
async fn test_misfire_dropped_when_replay_disabled() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let gate = Arc::new(Semaphore::new(0));
    let config = JobConfig::builder("billing", "BillingJob", 1)
        .misfire(false)
        .build()
        .unwrap();
    let a = start_node(&cluster, &config, "10.0.0.1", RecordingJob::gated("a", &log, &gate)).await;

    a.fire();
    wait_for("execution to start", || async { a.job.handle().is_running() }).await;
    a.fire();
    wait_for("misfire to be recorded", || async {
        cluster.snapshot().contains_key("/billing/sharding/0/misfire")
    })
    .await;

    gate.add_permits(1);
    wait_for("misfire to be dropped", || async {
        !cluster.snapshot().contains_key("/billing/sharding/0/misfire")
    })
    .await;
    settle().await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_clock_skew_blocks_execution() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let config = JobConfig::builder("billing", "BillingJob", 2)
        .max_time_diff_seconds(5)
        .build()
        .unwrap();
    let a = start_node(&cluster, &config, "10.0.0.1", RecordingJob::new("a", &log)).await;

    cluster.set_clock_offset(chrono::Duration::seconds(30));
    a.fire();
    settle().await;
    assert!(log.lock().unwrap().is_empty());

    cluster.set_clock_offset(chrono::Duration::zero());
    a.fire();
    wait_for("execution once clocks agree", || async { items_run(&log) == vec![0, 1] }).await;
}

#[tokio::test]
async fn test_conflicting_job_class_is_rejected() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let config = JobConfig::builder("billing", "BillingJob", 2).build().unwrap();
    let a = start_node(&cluster, &config, "10.0.0.1", RecordingJob::new("a", &log)).await;

    let other = JobConfig::builder("billing", "InvoiceJob", 2).build().unwrap();
    let store: Arc<dyn CoordinationStore> = cluster.connect();
    let result = JobBootstrap::new(
        store,
        Arc::new(JobRegistry::new()),
        settings("10.0.0.2"),
        other,
        Arc::new(RecordingJob::new("b", &log)),
    )
    .start()
    .await;

    match result {
        Err(Error::ConfigurationConflict {
            registered_class,
            new_class,
            ..
        }) => {
            assert_eq!(registered_class, "BillingJob");
            assert_eq!(new_class, "InvoiceJob");
        }
        other => panic!("expected a configuration conflict, got {other:?}"),
    }

    // The running instance is unaffected
    a.fire();
    wait_for("a to run every item", || async { items_run_by(&log, "a") == vec![0, 1] }).await;
}
