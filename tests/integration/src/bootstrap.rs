//! Bringing a cluster up from nothing, and back up from disk.

use ember_cluster::{MemberStatus, PartitionStatus};

use crate::helpers::{id, wait_until, TestCluster};

#[tokio::test]
async fn three_members_converge_on_generated_configuration() {
    let cluster = TestCluster::start(3).await;
    let generated = cluster.coordinator().configuration().await.unwrap();

    assert_eq!(generated.members.len(), 3);
    assert_eq!(generated.partition_ids().len(), 3);
    assert!(generated.cluster_id.is_some());
    assert!(generated.routing_state.is_some());
    for (member, state) in &generated.members {
        assert_eq!(state.status, MemberStatus::Active, "member {member}");
        assert_eq!(state.partitions.len(), 1, "member {member}");
        for partition in state.partitions.values() {
            assert_eq!(partition.status, PartitionStatus::Active);
            assert!(partition.config.exporter("audit").is_some());
        }
    }

    for n in 1..3 {
        let seen = wait_until(cluster.member(n).subscribe(), |c| *c == generated).await;
        assert_eq!(seen.cluster_id, generated.cluster_id);
    }
}

#[tokio::test]
async fn only_the_coordinator_generates() {
    let cluster = TestCluster::start(2).await;
    assert!(cluster.coordinator().is_coordinator());
    assert!(!cluster.member(1).is_coordinator());

    // the non-coordinator's configuration came from gossip, so it carries
    // the coordinator's cluster id
    let coordinator = cluster.coordinator().configuration().await.unwrap();
    let member = cluster.member(1).configuration().await.unwrap();
    assert_eq!(member.cluster_id, coordinator.cluster_id);
    assert!(member.member(&id("1")).is_some());
}

#[tokio::test]
async fn restart_loads_persisted_configuration() {
    let cluster = TestCluster::start(2).await;
    let before = cluster.coordinator().configuration().await.unwrap();
    cluster.converge_on(before.version).await;
    let dirs = cluster.shutdown();

    let restarted = TestCluster::start_in(dirs).await;
    for n in 0..2 {
        assert_eq!(restarted.member(n).configuration().await.unwrap(), before);
    }
}
