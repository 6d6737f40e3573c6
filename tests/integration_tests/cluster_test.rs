//! Leader election and shard assignment across instances

use super::fixtures::*;
use shardkeeper::coordinator::ServerStatus;
use shardkeeper::strategy::ShardingStrategyType;
use shardkeeper::JobConfig;
use shardkeeper::store::MemoryCluster;

fn config(total: u32) -> JobConfig {
    JobConfig::builder("billing", "BillingJob", total).build().unwrap()
}

// ============================================================================
// Leader Election Tests
// ============================================================================

#[tokio::test]
async fn test_single_leader_among_instances() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let mut nodes = Vec::new();
    for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        nodes.push(start_node(&cluster, &config(3), ip, RecordingJob::new(ip, &log)).await);
    }

    let leader = leader_of(&cluster, "billing").expect("a leader is elected");
    assert_eq!(leader, nodes[0].id());

    let mut leaders = 0;
    for node in &nodes {
        if node.job.services().leader.is_leader().await.unwrap() {
            leaders += 1;
        }
    }
    assert_eq!(leaders, 1);
}

#[tokio::test]
async fn test_leader_crash_elects_survivor() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(3), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(3), "10.0.0.2", RecordingJob::new("b", &log)).await;
    let c = start_node(&cluster, &config(3), "10.0.0.3", RecordingJob::new("c", &log)).await;

    a.store.expire_session();

    let survivors = [b.id(), c.id()];
    wait_for("a new leader", || async {
        leader_of(&cluster, "billing").is_some_and(|leader| survivors.contains(&leader))
    })
    .await;

    let mut leaders = 0;
    for node in [&b, &c] {
        if node.job.services().leader.is_leader().await.unwrap() {
            leaders += 1;
        }
    }
    assert_eq!(leaders, 1);
}

// ============================================================================
// Sharding Tests
// ============================================================================

#[tokio::test]
async fn test_five_items_over_three_instances() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(5), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(5), "10.0.0.2", RecordingJob::new("b", &log)).await;
    let c = start_node(&cluster, &config(5), "10.0.0.3", RecordingJob::new("c", &log)).await;
    settle().await;

    for node in [&a, &b, &c] {
        node.fire();
    }
    wait_for("every item to run", || async { items_run(&log) == vec![0, 1, 2, 3, 4] }).await;

    assert_eq!(items_owned_by(&cluster, "billing", &a.id()), vec![0, 3]);
    assert_eq!(items_owned_by(&cluster, "billing", &b.id()), vec![1, 4]);
    assert_eq!(items_owned_by(&cluster, "billing", &c.id()), vec![2]);

    assert_eq!(items_run_by(&log, "a"), vec![0, 3]);
    assert_eq!(items_run_by(&log, "b"), vec![1, 4]);
    assert_eq!(items_run_by(&log, "c"), vec![2]);
    assert!(!resharding_pending(&cluster, "billing"));
}

#[tokio::test]
async fn test_assignment_covers_every_item_once_and_balances() {
    for strategy in [
        ShardingStrategyType::Average,
        ShardingStrategyType::OdevitySortByName,
        ShardingStrategyType::RotateServerByName,
    ] {
        let cluster = MemoryCluster::new();
        let log = new_log();
        let config = JobConfig::builder("billing", "BillingJob", 10)
            .sharding_strategy(strategy)
            .build()
            .unwrap();
        let mut nodes = Vec::new();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            nodes.push(start_node(&cluster, &config, ip, RecordingJob::new(ip, &log)).await);
        }
        settle().await;

        nodes[0].fire();
        wait_for("resharding", || async {
            owners(&cluster, "billing").len() == 10 && !resharding_pending(&cluster, "billing")
        })
        .await;

        let owners = owners(&cluster, "billing");
        assert_eq!(owners.keys().copied().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());

        let mut sizes: Vec<usize> = nodes
            .iter()
            .map(|node| owners.values().filter(|owner| **owner == node.id()).count())
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![3, 3, 4], "{strategy:?}");
    }
}

#[tokio::test]
async fn test_reshard_without_changes_keeps_assignment() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(4), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(4), "10.0.0.2", RecordingJob::new("b", &log)).await;
    settle().await;

    a.fire();
    wait_for("resharding", || async { !resharding_pending(&cluster, "billing") }).await;
    let before = owners(&cluster, "billing");

    a.job.services().sharding.set_resharding_flag().await.unwrap();
    a.fire();
    b.fire();
    wait_for("second resharding", || async { !resharding_pending(&cluster, "billing") }).await;

    assert_eq!(owners(&cluster, "billing"), before);
}

#[tokio::test]
async fn test_disabled_server_loses_its_items() {
    let cluster = MemoryCluster::new();
    let log = new_log();
    let a = start_node(&cluster, &config(4), "10.0.0.1", RecordingJob::new("a", &log)).await;
    let b = start_node(&cluster, &config(4), "10.0.0.2", RecordingJob::new("b", &log)).await;
    settle().await;

    a.fire();
    wait_for("initial assignment", || async {
        items_owned_by(&cluster, "billing", &b.id()) == vec![2, 3]
    })
    .await;

    a.job
        .services()
        .server
        .set_status(&b.ip, ServerStatus::Disabled)
        .await
        .unwrap();
    wait_for("resharding request", || async { resharding_pending(&cluster, "billing") }).await;

    a.fire();
    wait_for("reassignment", || async {
        items_owned_by(&cluster, "billing", &a.id()) == vec![0, 1, 2, 3]
    })
    .await;
}
