//! Start-up, shutdown and connection lifecycle

use super::fixtures::*;
use shardkeeper::store::{CoordinationStore, MemoryCluster};
use shardkeeper::JobConfig;

fn config() -> JobConfig {
    JobConfig::builder("billing", "BillingJob", 4).build().unwrap()
}

#[tokio::test]
async fn test_external_instance_removal_forces_shutdown() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(), "10.0.0.2", RecordingJob::new("b", &log)).await;
    settle().await;
    assert_eq!(leader_of(&cluster, "billing"), Some(a.id()));

    let operator = cluster.connect();
    operator
        .remove(&format!("/billing/instances/{}", a.id()))
        .await
        .unwrap();

    wait_for("a to shut down", || async { a.job.is_shutdown() }).await;
    wait_for("a to leave its registry", || async { a.registry.get("billing").await.is_none() }).await;
    wait_for("b to take the lead", || async { leader_of(&cluster, "billing") == Some(b.id()) }).await;

    b.fire();
    wait_for("b to own every item", || async { items_run_by(&log, "b") == vec![0, 1, 2, 3] }).await;
    assert!(items_run_by(&log, "a").is_empty());
}

#[tokio::test]
async fn test_graceful_shutdown_hands_items_over() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(), "10.0.0.2", RecordingJob::new("b", &log)).await;
    settle().await;

    a.fire();
    b.fire();
    wait_for("first execution", || async { items_run(&log) == vec![0, 1, 2, 3] }).await;
    let a_id = a.id();

    a.job.shutdown().await.unwrap();

    let snapshot = cluster.snapshot();
    assert!(!snapshot.contains_key(&format!("/billing/instances/{a_id}")));
    assert_ne!(leader_of(&cluster, "billing"), Some(a_id.clone()));
    assert!(a.registry.is_shutdown("billing").await);

    wait_for("resharding request", || async { resharding_pending(&cluster, "billing") }).await;
    b.fire();
    wait_for("b to own every item", || async {
        items_owned_by(&cluster, "billing", &b.id()) == vec![0, 1, 2, 3]
    })
    .await;
}

#[tokio::test]
async fn test_suspended_connection_pauses_then_resumes() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(), "10.0.0.1", RecordingJob::new("a", &log)).await;

    a.store.suspend();
    wait_for("a to pause", || async { a.job.handle().is_paused() }).await;

    a.fire();
    settle().await;
    assert!(log.lock().unwrap().is_empty());

    a.store.reconnect();
    wait_for("a to resume", || async { !a.job.handle().is_paused() }).await;

    a.fire();
    wait_for("a to run every item", || async { items_run(&log) == vec![0, 1, 2, 3] }).await;
    assert!(!a.job.is_shutdown());
}

#[tokio::test]
async fn test_expired_session_reregisters_on_reconnect() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(), "10.0.0.2", RecordingJob::new("b", &log)).await;
    settle().await;

    a.store.expire_session();
    wait_for("b to take the lead", || async { leader_of(&cluster, "billing") == Some(b.id()) }).await;
    assert!(!cluster
        .snapshot()
        .contains_key(&format!("/billing/instances/{}", a.id())));

    a.store.reconnect();
    wait_for("a to re-register", || async {
        cluster
            .snapshot()
            .contains_key(&format!("/billing/instances/{}", a.id()))
    })
    .await;
    wait_for("a to resume", || async { !a.job.handle().is_paused() }).await;
    assert!(!a.job.is_shutdown());
    settle().await;

    a.fire();
    b.fire();
    wait_for("both to run their items", || async {
        items_run_by(&log, "a") == vec![0, 1] && items_run_by(&log, "b") == vec![2, 3]
    })
    .await;
}
