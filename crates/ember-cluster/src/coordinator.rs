//! Starting and cancelling configuration changes.
//!
//! Only the statically designated coordinator may start a change plan.
//! A plan is validated by simulating every operation in order against the
//! current configuration before it is accepted.

use tracing::info;

use crate::applier::simulate;
use crate::change::now_ms;
use crate::configuration::ClusterConfiguration;
use crate::manager::ManagerHandle;
use crate::member::MemberId;
use crate::operation::ClusterConfigurationChangeOperation;
use crate::ClusterError;

#[derive(Clone)]
pub struct ChangeCoordinator {
    coordinator: MemberId,
    manager: ManagerHandle,
}

impl ChangeCoordinator {
    pub fn new(coordinator: MemberId, manager: ManagerHandle) -> Self {
        Self {
            coordinator,
            manager,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        *self.manager.local_id() == self.coordinator
    }

    fn check_coordinator(&self) -> Result<(), ClusterError> {
        if self.is_coordinator() {
            Ok(())
        } else {
            Err(ClusterError::NotCoordinator {
                local: self.manager.local_id().clone(),
                coordinator: self.coordinator.clone(),
            })
        }
    }

    /// Starts a change plan and returns the configuration carrying it.
    ///
    /// An empty plan changes nothing and returns the current configuration.
    pub async fn start_change(
        &self,
        operations: Vec<ClusterConfigurationChangeOperation>,
    ) -> Result<ClusterConfiguration, ClusterError> {
        self.check_coordinator()?;
        let started = self
            .manager
            .update(move |current| {
                if let Some(plan) = current.pending_changes.as_ref() {
                    return Err(ClusterError::ConcurrentModification { change_id: plan.id });
                }
                if operations.is_empty() {
                    return Ok(current.clone());
                }
                simulate(current, &operations)?;
                current.clone().start_change(operations, now_ms())
            })
            .await?;
        if let Some(plan) = &started.pending_changes {
            info!(
                change = plan.id,
                operations = plan.pending_operations.len(),
                "configuration change started"
            );
        }
        Ok(started)
    }

    /// Cancels the pending plan with id `change_id`.
    ///
    /// Operations already in flight finish on their member, but their
    /// results are discarded as stale.
    pub async fn cancel_change(&self, change_id: u64) -> Result<ClusterConfiguration, ClusterError> {
        self.check_coordinator()?;
        let cancelled = self
            .manager
            .update(move |current| match &current.pending_changes {
                Some(plan) if plan.id == change_id => {
                    Ok(current.clone().cancel_pending_changes(now_ms()))
                }
                Some(plan) => Err(ClusterError::invalid(format!(
                    "change {change_id} is not pending, change {} is",
                    plan.id
                ))),
                None => Err(ClusterError::invalid(format!(
                    "change {change_id} is not pending"
                ))),
            })
            .await?;
        info!(change = change_id, "configuration change cancelled");
        Ok(cancelled)
    }

    /// Returns the coordinator's current configuration.
    pub async fn query(&self) -> Result<ClusterConfiguration, ClusterError> {
        self.manager.configuration().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::backoff::ExponentialBackoff;
    use crate::change::ChangeStatus;
    use crate::gossip::{spawn_gossip, ConfigGossip, GossipConfig};
    use crate::init::Initializer;
    use crate::manager::{spawn_manager, ConfigurationManager};
    use crate::member::{DynamicPartitionConfig, MemberState, PartitionState};
    use crate::persisted::{PersistedClusterConfiguration, META_FILE_NAME};
    use crate::transport::LocalNetwork;

    type Op = ClusterConfigurationChangeOperation;

    fn id(s: &str) -> MemberId {
        MemberId::from(s)
    }

    fn base() -> ClusterConfiguration {
        ClusterConfiguration::init().add_member(
            id("a"),
            MemberState::active(
                [(1, PartitionState::active(1, DynamicPartitionConfig::default()))].into(),
            ),
        )
    }

    async fn coordinator(local: &str, dir: &tempfile::TempDir) -> ChangeCoordinator {
        let (events, events_rx) = mpsc::channel(16);
        let engine = ConfigGossip::new(id(local), vec![], GossipConfig::default(), events);
        let gossip = spawn_gossip(engine, Arc::new(LocalNetwork::new().endpoint(id(local))), 16);
        let manager = ConfigurationManager::new(
            id(local),
            PersistedClusterConfiguration::new(dir.path().join(META_FILE_NAME)),
            gossip,
            ExponentialBackoff::default(),
        );
        let manager = spawn_manager(manager, events_rx, 16);
        manager.initialize(Initializer::fixed(base())).await.unwrap();
        ChangeCoordinator::new(id("a"), manager)
    }

    fn join_b() -> Vec<Op> {
        vec![
            Op::MemberJoin { member_id: id("b") },
            Op::PartitionJoin {
                member_id: id("b"),
                partition_id: 1,
                priority: 1,
            },
        ]
    }

    #[tokio::test]
    async fn only_the_coordinator_starts_changes() {
        let dir = tempfile::tempdir().unwrap();
        let other = coordinator("b", &dir).await;
        assert!(!other.is_coordinator());
        let err = other.start_change(join_b()).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotCoordinator { .. }));
    }

    #[tokio::test]
    async fn start_change_records_plan() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator("a", &dir).await;
        let started = coordinator.start_change(join_b()).await.unwrap();
        assert_eq!(started.version, base().version + 1);
        let plan = started.pending_changes.clone().unwrap();
        assert_eq!(plan.id, started.version);
        assert_eq!(plan.pending_operations, join_b());
        assert_eq!(coordinator.query().await.unwrap(), started);
    }

    #[tokio::test]
    async fn second_plan_is_rejected_while_one_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator("a", &dir).await;
        let started = coordinator.start_change(join_b()).await.unwrap();
        let err = coordinator.start_change(join_b()).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::ConcurrentModification { change_id } if change_id == started.version
        ));
    }

    #[tokio::test]
    async fn invalid_plan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator("a", &dir).await;
        let reversed: Vec<Op> = join_b().into_iter().rev().collect();
        let err = coordinator.start_change(reversed).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidRequest(_)));
        assert_eq!(coordinator.query().await.unwrap(), base());
    }

    #[tokio::test]
    async fn empty_plan_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator("a", &dir).await;
        assert_eq!(coordinator.start_change(vec![]).await.unwrap(), base());
    }

    #[tokio::test]
    async fn cancel_records_cancelled_change() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator("a", &dir).await;
        let started = coordinator.start_change(join_b()).await.unwrap();
        let plan_id = started.pending_changes.as_ref().unwrap().id;

        assert!(matches!(
            coordinator.cancel_change(plan_id + 7).await,
            Err(ClusterError::InvalidRequest(_))
        ));

        let cancelled = coordinator.cancel_change(plan_id).await.unwrap();
        assert!(cancelled.pending_changes.is_none());
        assert_eq!(cancelled.version, started.version + 1);
        let last = cancelled.last_change.unwrap();
        assert_eq!(last.id, plan_id);
        assert_eq!(last.status, ChangeStatus::Cancelled);

        // a new plan can start afterwards
        assert!(coordinator.start_change(join_b()).await.is_ok());
    }
}
