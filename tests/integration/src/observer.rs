//! Read-only observers following the cluster.

use std::sync::Arc;
use std::time::Duration;

use ember_cluster::{ClusterConfigurationChangeOperation as Op, GossipConfig, ObserverService};

use crate::helpers::{id, record, wait_until, within, TestCluster};

fn observe(cluster: &TestCluster) -> ObserverService {
    let observer = ObserverService::spawn(
        id("observer"),
        cluster
            .members
            .iter()
            .map(|m| m.local_id().clone())
            .collect(),
        GossipConfig {
            sync_interval: Duration::from_millis(50),
            fanout: 2,
        },
        Arc::new(cluster.network.endpoint(id("observer"))),
    );
    cluster.network.register(observer.gossip().clone());
    observer
}

#[tokio::test]
async fn observer_learns_the_configuration() {
    let cluster = TestCluster::start(2).await;
    let observer = observe(&cluster);

    let configuration = cluster.coordinator().configuration().await.unwrap();
    let heard = within(observer.wait_initialized()).await.unwrap();
    assert!(heard.version <= configuration.version);
    wait_until(observer.subscribe(), |c| *c == configuration).await;
    // observers are never members
    assert!(configuration.member(&id("observer")).is_none());
}

#[tokio::test]
async fn observer_follows_changes() {
    let cluster = TestCluster::start(2).await;
    record(cluster.coordinator()).await;
    let observer = observe(&cluster);
    within(observer.wait_initialized()).await.unwrap();

    let started = cluster
        .coordinator()
        .start_change(vec![Op::PartitionReconfigurePriority {
            member_id: id("0"),
            partition_id: 1,
            priority: 3,
        }])
        .await
        .unwrap();
    let done = wait_until(cluster.coordinator().subscribe(), |c| {
        c.pending_changes.is_none() && c.version > started.version
    })
    .await;

    let seen = wait_until(observer.subscribe(), |c| c.version >= done.version).await;
    assert_eq!(seen, done);
}
