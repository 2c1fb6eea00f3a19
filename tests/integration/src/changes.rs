//! Change plans carried out across members.

use ember_cluster::{
    ChangeStatus, ClusterConfigurationChangeOperation as Op, ClusterError, PartitionStatus,
};

use crate::helpers::{id, record, wait_until, TestCluster};

/// Moves partition 1 from member 0 to member 1.
fn move_partition_one() -> Vec<Op> {
    vec![
        Op::PartitionJoin {
            member_id: id("1"),
            partition_id: 1,
            priority: 1,
        },
        Op::PartitionLeave {
            member_id: id("0"),
            partition_id: 1,
            minimum_allowed_replicas: 1,
        },
    ]
}

#[tokio::test]
async fn plan_runs_on_each_member_in_order() {
    let cluster = TestCluster::start(2).await;
    let recorders = cluster.record_all().await;

    let started = cluster
        .coordinator()
        .start_change(move_partition_one())
        .await
        .unwrap();
    let plan_id = started.pending_changes.as_ref().unwrap().id;

    let done = wait_until(cluster.coordinator().subscribe(), |c| {
        c.last_change.as_ref().is_some_and(|l| l.id == plan_id)
    })
    .await;
    let last = done.last_change.clone().unwrap();
    assert_eq!(last.status, ChangeStatus::Completed);
    assert!(done.pending_changes.is_none());
    // plan start plus one advance per operation
    assert_eq!(done.version, started.version + 2);

    assert!(!done.member(&id("0")).unwrap().has_partition(1));
    let joined = done.member(&id("1")).unwrap().partition(1).unwrap();
    assert_eq!(joined.status, PartitionStatus::Active);
    assert_eq!(done.replicas_of(1).len(), 1);

    assert_eq!(recorders[1].calls(), vec!["join 1 0,1".to_owned()]);
    assert_eq!(recorders[0].calls(), vec!["leave 1".to_owned()]);

    let converged = cluster.converge_on(done.version).await;
    assert!(converged.iter().all(|c| *c == done));
}

#[tokio::test]
async fn plan_waits_for_the_target_member_to_register() {
    let cluster = TestCluster::start(2).await;
    let coordinator_recorder = record(cluster.coordinator()).await;

    let started = cluster
        .coordinator()
        .start_change(move_partition_one())
        .await
        .unwrap();

    // member 1 has the plan but nothing to apply it with
    wait_until(cluster.member(1).subscribe(), |c| c.version >= started.version).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let stalled = cluster.coordinator().configuration().await.unwrap();
    assert_eq!(stalled.version, started.version);
    assert!(coordinator_recorder.calls().is_empty());

    let member_recorder = record(cluster.member(1)).await;
    let done = wait_until(cluster.coordinator().subscribe(), |c| {
        c.pending_changes.is_none() && c.version > started.version
    })
    .await;
    assert_eq!(done.last_change.unwrap().status, ChangeStatus::Completed);
    assert_eq!(member_recorder.calls().len(), 1);
    assert_eq!(coordinator_recorder.calls(), vec!["leave 1".to_owned()]);
}

#[tokio::test]
async fn cancelled_plan_stops_everywhere() {
    let cluster = TestCluster::start(2).await;

    let started = cluster
        .coordinator()
        .start_change(move_partition_one())
        .await
        .unwrap();
    let plan_id = started.pending_changes.as_ref().unwrap().id;

    let cancelled = cluster.coordinator().cancel_change(plan_id).await.unwrap();
    assert_eq!(cancelled.last_change.as_ref().unwrap().status, ChangeStatus::Cancelled);

    let seen = wait_until(cluster.member(1).subscribe(), |c| c.version >= cancelled.version).await;
    assert!(seen.pending_changes.is_none());

    // registering afterwards applies nothing
    let recorder = record(cluster.member(1)).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn only_the_coordinator_starts_plans() {
    let cluster = TestCluster::start(2).await;
    let err = cluster
        .member(1)
        .start_change(move_partition_one())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NotCoordinator { .. }));
}

#[tokio::test]
async fn invalid_plan_leaves_configuration_untouched() {
    let cluster = TestCluster::start(2).await;
    let before = cluster.coordinator().configuration().await.unwrap();

    // member 0 can't leave partition 1 before anyone else hosts it
    let err = cluster
        .coordinator()
        .start_change(move_partition_one().into_iter().rev().collect())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::InvalidRequest(_)));
    assert_eq!(cluster.coordinator().configuration().await.unwrap(), before);
}
