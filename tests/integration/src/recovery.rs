//! Members that lost their state or their connectivity catching up.

use std::sync::Arc;

use ember_cluster::{
    read_configuration, ClusterConfigurationChangeOperation as Op, LocalNetwork, META_FILE_NAME,
};
use ember_persistence::MetaFile;

use crate::helpers::{id, record, settings, spawn_member, wait_until, within, TestCluster};

#[tokio::test]
async fn corrupt_file_is_replaced_from_a_peer() {
    let cluster = TestCluster::start(2).await;
    let configuration = cluster.coordinator().configuration().await.unwrap();
    cluster.converge_on(configuration.version).await;

    let mut dirs = cluster.shutdown();
    let dir = dirs.pop().unwrap();
    let meta_path = dir.path().join(META_FILE_NAME);
    std::fs::write(&meta_path, b"not a configuration").unwrap();

    // the coordinator comes back from its file; member 1 has to sync
    let network = LocalNetwork::new();
    let mut coordinator = spawn_member(&network, settings("0", &["0", "1"]), dirs[0].path());
    let mut member = spawn_member(&network, settings("1", &["0", "1"]), dir.path());
    within(coordinator.initialize(Arc::new(network.endpoint(id("0")))))
        .await
        .unwrap();
    let recovered = within(member.initialize(Arc::new(network.endpoint(id("1")))))
        .await
        .unwrap();
    assert_eq!(recovered, configuration);

    // the recovered configuration replaced the broken file
    let reread = read_configuration(&MetaFile::new(&meta_path)).unwrap();
    assert_eq!(reread, configuration);
}

#[tokio::test]
async fn isolated_member_catches_up_after_heal() {
    let cluster = TestCluster::start(3).await;
    record(cluster.coordinator()).await;

    cluster.network.isolate(&id("2"));
    let started = cluster
        .coordinator()
        .start_change(vec![Op::PartitionReconfigurePriority {
            member_id: id("0"),
            partition_id: 1,
            priority: 7,
        }])
        .await
        .unwrap();
    let done = wait_until(cluster.coordinator().subscribe(), |c| {
        c.pending_changes.is_none() && c.version > started.version
    })
    .await;
    assert_eq!(
        done.member(&id("0")).unwrap().partition(1).unwrap().priority,
        7
    );

    wait_until(cluster.member(1).subscribe(), |c| *c == done).await;
    assert!(cluster.member(2).configuration().await.unwrap().version < done.version);

    cluster.network.heal(&id("2"));
    let caught_up = wait_until(cluster.member(2).subscribe(), |c| c.version >= done.version).await;
    assert_eq!(caught_up, done);
}
