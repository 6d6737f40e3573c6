//! Failover of items abandoned by crashed instances

use super::fixtures::*;
use shardkeeper::store::MemoryCluster;
use shardkeeper::JobConfig;
use std::sync::Arc;
use tokio::sync::Semaphore;

fn config(failover: bool) -> JobConfig {
    JobConfig::builder("billing", "BillingJob", 4)
        .failover(failover)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_crashed_items_are_taken_over() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    // b never gets a permit, so its items stay in flight until it crashes
    let stuck = Arc::new(Semaphore::new(0));
    let a = start_node(&cluster, &config(true), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(true), "10.0.0.2", RecordingJob::gated("b", &log, &stuck)).await;
    settle().await;

    a.fire();
    b.fire();
    wait_for("a to run its items", || async { items_run_by(&log, "a") == vec![0, 1] }).await;
    wait_for("b to start its items", || async {
        let snapshot = cluster.snapshot();
        snapshot.contains_key("/billing/sharding/2/running")
            && snapshot.contains_key("/billing/sharding/3/running")
    })
    .await;

    b.store.expire_session();

    wait_for("a to take over b's items", || async {
        items_run_by(&log, "a") == vec![0, 1, 2, 3]
    })
    .await;
    assert!(items_run_by(&log, "b").is_empty());

    wait_for("failover state to clear", || async {
        let snapshot = cluster.snapshot();
        !snapshot.keys().any(|path| path.ends_with("/failover") || path.ends_with("/failovering"))
    })
    .await;
}

#[tokio::test]
async fn test_no_failover_when_disabled() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let stuck = Arc::new(Semaphore::new(0));
    let a = start_node(&cluster, &config(false), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(false), "10.0.0.2", RecordingJob::gated("b", &log, &stuck)).await;
    settle().await;

    a.fire();
    b.fire();
    wait_for("a to run its items", || async { items_run_by(&log, "a") == vec![0, 1] }).await;
    wait_for("b to start its items", || async {
        cluster.snapshot().contains_key("/billing/sharding/2/running")
    })
    .await;

    b.store.expire_session();
    wait_for("resharding request", || async { resharding_pending(&cluster, "billing") }).await;
    settle().await;

    assert!(!cluster.snapshot().keys().any(|path| path.ends_with("/failover")));
    assert_eq!(items_run_by(&log, "a"), vec![0, 1]);

    // The next regular execution picks the items up through resharding
    a.fire();
    wait_for("a to own every item", || async { items_run_by(&log, "a") == vec![0, 1, 2, 3] }).await;
}
