//! The cluster configuration value and its merge algebra.
//!
//! A [`ClusterConfiguration`] is never mutated in place by its owners.
//! Every change produces a new value which replaces the old one, and two
//! values that reached different members independently are reconciled with
//! [`ClusterConfiguration::merge`].
//!
//! # Merge rules
//!
//! - `uninitialized()` has version 0 and loses against anything else.
//! - When versions differ, the higher-versioned configuration decides which
//!   members exist and what the pending plan is. Members present in both
//!   are still merged per member, so a strictly newer member update is
//!   never lost.
//! - When versions are equal, members are unioned and merged per member,
//!   and the plan and last change use "richer wins".
//! - A pending plan that either side already recorded as finished is
//!   dropped, whatever the versions. Cancelling and advancing the same plan
//!   concurrently therefore always ends cancelled.
//! - Routing state merges by its own version. A cluster id beats no cluster
//!   id; two different ids resolve to the smaller one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::change::{ChangeStatus, ClusterChangePlan, CompletedChange};
use crate::member::{MemberId, MemberState, MemberStatus, PartitionId};
use crate::operation::ClusterConfigurationChangeOperation;
use crate::routing::RoutingState;
use crate::ClusterError;

/// Version of the uninitialized configuration.
pub const UNINITIALIZED_VERSION: u64 = 0;

/// Versioned description of the cluster's members, partitions, and
/// pending changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    /// Bumped whenever the pending plan starts, advances, or is cancelled.
    pub version: u64,
    pub members: BTreeMap<MemberId, MemberState>,
    pub last_change: Option<CompletedChange>,
    pub pending_changes: Option<ClusterChangePlan>,
    pub routing_state: Option<RoutingState>,
    /// Set once, never changed afterwards.
    pub cluster_id: Option<String>,
}

impl Default for ClusterConfiguration {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl ClusterConfiguration {
    /// The "not yet known" configuration.
    pub fn uninitialized() -> Self {
        Self {
            version: UNINITIALIZED_VERSION,
            members: BTreeMap::new(),
            last_change: None,
            pending_changes: None,
            routing_state: None,
            cluster_id: None,
        }
    }

    /// An empty, initialized configuration.
    pub fn init() -> Self {
        Self {
            version: UNINITIALIZED_VERSION + 1,
            ..Self::uninitialized()
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        self.version == UNINITIALIZED_VERSION
    }

    pub fn member(&self, id: &MemberId) -> Option<&MemberState> {
        self.members.get(id)
    }

    pub fn has_member(&self, id: &MemberId) -> bool {
        self.members.contains_key(id)
    }

    /// Adds a member, replacing any previous state for it.
    pub fn add_member(mut self, id: MemberId, state: MemberState) -> Self {
        self.members.insert(id, state);
        self
    }

    /// Applies `f` to an existing member. Unknown members are left alone.
    pub fn update_member(
        mut self,
        id: &MemberId,
        f: impl FnOnce(MemberState) -> MemberState,
    ) -> Self {
        if let Some(state) = self.members.remove(id) {
            self.members.insert(id.clone(), f(state));
        }
        self
    }

    pub fn remove_member(mut self, id: &MemberId) -> Self {
        self.members.remove(id);
        self
    }

    /// Replaces the routing state, keeping its version above the current one.
    pub fn set_routing_state(mut self, mut routing: RoutingState) -> Self {
        if let Some(current) = &self.routing_state {
            routing.version = routing.version.max(current.version + 1);
        }
        self.routing_state = Some(routing);
        self
    }

    /// Stamps a cluster id unless one is already set.
    pub fn set_cluster_id_if_absent(mut self, id: impl Into<String>) -> Self {
        if self.cluster_id.is_none() {
            self.cluster_id = Some(id.into());
        }
        self
    }

    /// Every partition hosted by at least one member.
    pub fn partition_ids(&self) -> BTreeSet<PartitionId> {
        self.members
            .values()
            .flat_map(|m| m.partitions.keys().copied())
            .collect()
    }

    /// Members hosting `partition`, with their replica priority.
    pub fn replicas_of(&self, partition: PartitionId) -> BTreeMap<MemberId, u32> {
        self.members
            .iter()
            .filter_map(|(id, m)| m.partition(partition).map(|p| (id.clone(), p.priority)))
            .collect()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending_changes
            .as_ref()
            .is_some_and(ClusterChangePlan::has_pending_operations)
    }

    /// Returns the operation at the head of the pending plan.
    pub fn next_pending_operation(&self) -> Option<&ClusterConfigurationChangeOperation> {
        self.pending_changes
            .as_ref()
            .and_then(ClusterChangePlan::next_operation)
    }

    /// Returns the head operation if it is addressed to `member`.
    pub fn pending_change_for(
        &self,
        member: &MemberId,
    ) -> Option<&ClusterConfigurationChangeOperation> {
        self.next_pending_operation()
            .filter(|op| op.member_id() == member)
    }

    /// Starts a new change plan.
    pub fn start_change(
        self,
        operations: Vec<ClusterConfigurationChangeOperation>,
        now: u64,
    ) -> Result<Self, ClusterError> {
        if let Some(plan) = self.pending_changes.as_ref().filter(|p| p.has_pending_operations()) {
            return Err(ClusterError::ConcurrentModification { change_id: plan.id });
        }
        if operations.is_empty() {
            return Ok(self);
        }
        let version = self.version + 1;
        Ok(Self {
            version,
            pending_changes: Some(ClusterChangePlan::init(version, operations, now)),
            ..self
        })
    }

    /// Applies `transformer` for the completed head operation and advances
    /// the plan. When the last operation completes, the plan is recorded
    /// as `last_change` and cleared.
    pub fn advance_configuration_change(
        self,
        transformer: impl FnOnce(Self) -> Self,
        now: u64,
    ) -> Self {
        let mut next = transformer(self);
        let Some(plan) = next.pending_changes.take() else {
            return next;
        };
        let plan = plan.advance(now);
        next.version += 1;
        if plan.has_pending_operations() {
            next.pending_changes = Some(plan);
        } else {
            next.last_change = Some(plan.finish(ChangeStatus::Completed, now));
        }
        next
    }

    /// Cancels the pending plan, recording it as cancelled.
    pub fn cancel_pending_changes(mut self, now: u64) -> Self {
        if let Some(plan) = self.pending_changes.take() {
            self.last_change = Some(plan.finish(ChangeStatus::Cancelled, now));
            self.version += 1;
        }
        self
    }

    /// Merges two configurations. Commutative and idempotent.
    pub fn merge(&self, other: &ClusterConfiguration) -> ClusterConfiguration {
        if self.version != other.version {
            let (high, low) = if self.version > other.version {
                (self, other)
            } else {
                (other, self)
            };
            let members = high
                .members
                .iter()
                .map(|(id, state)| {
                    let merged = match low.members.get(id) {
                        Some(theirs) => state.clone().merge(theirs.clone()),
                        None => state.clone(),
                    };
                    (id.clone(), merged)
                })
                .collect();
            return ClusterConfiguration {
                version: high.version,
                members,
                last_change: merge_option(high.last_change.clone(), low.last_change.clone(), |a, b| {
                    a.max(b)
                }),
                pending_changes: unfinished(high.pending_changes.clone(), high, low),
                routing_state: merge_option(
                    high.routing_state.clone(),
                    low.routing_state.clone(),
                    RoutingState::merge,
                ),
                cluster_id: merge_option(high.cluster_id.clone(), low.cluster_id.clone(), |a, b| {
                    a.min(b)
                }),
            };
        }

        let mut members = self.members.clone();
        for (id, theirs) in &other.members {
            let merged = match members.remove(id) {
                Some(ours) => ours.merge(theirs.clone()),
                None => theirs.clone(),
            };
            members.insert(id.clone(), merged);
        }

        ClusterConfiguration {
            version: self.version,
            members,
            last_change: merge_option(self.last_change.clone(), other.last_change.clone(), |a, b| {
                a.max(b)
            }),
            pending_changes: unfinished(
                merge_option(
                    self.pending_changes.clone(),
                    other.pending_changes.clone(),
                    ClusterChangePlan::merge,
                ),
                self,
                other,
            ),
            routing_state: merge_option(
                self.routing_state.clone(),
                other.routing_state.clone(),
                RoutingState::merge,
            ),
            cluster_id: merge_option(self.cluster_id.clone(), other.cluster_id.clone(), |a, b| {
                a.min(b)
            }),
        }
    }

    /// Returns true if `new` differs from `self` in the state recorded for
    /// `member` in a way the member should be told about.
    ///
    /// A member that had left and is now gone was pruned on purpose, which
    /// is expected.
    pub fn member_changed_externally(&self, new: &ClusterConfiguration, member: &MemberId) -> bool {
        let old_state = self.member(member);
        let new_state = new.member(member);
        match (old_state, new_state) {
            (Some(old), None) => old.status != MemberStatus::Left,
            (old, new) => old != new,
        }
    }
}

/// Drops `plan` once either side has recorded it as finished. A cancelled
/// plan stays cancelled even if some member advanced it concurrently.
fn unfinished(
    plan: Option<ClusterChangePlan>,
    a: &ClusterConfiguration,
    b: &ClusterConfiguration,
) -> Option<ClusterChangePlan> {
    plan.filter(|plan| {
        ![a, b]
            .iter()
            .any(|c| c.last_change.as_ref().is_some_and(|last| last.id == plan.id))
    })
}

/// "Richer wins": a present value beats an absent one, two present values
/// are combined with `f`.
fn merge_option<T>(a: Option<T>, b: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
pub(crate) mod arbitrary {
    //! Generators for configurations a running cluster can actually hold.

    use proptest::prelude::*;

    use super::*;
    use crate::member::{DynamicPartitionConfig, PartitionState};

    fn member_state() -> impl Strategy<Value = MemberState> {
        (
            0u64..4,
            prop::collection::btree_map(1u32..5, (1u32..4, any::<bool>()), 0..3),
            0u8..3,
        )
            .prop_map(|(bumps, partitions, status)| {
                let partitions = partitions
                    .into_iter()
                    .map(|(id, (priority, exporter))| {
                        let config = if exporter {
                            DynamicPartitionConfig::with_enabled_exporters(["audit"])
                        } else {
                            DynamicPartitionConfig::default()
                        };
                        (id, PartitionState::active(priority, config))
                    })
                    .collect();
                let mut state = match status {
                    0 => MemberState::active(partitions),
                    1 => MemberState::active(partitions).to_leaving(),
                    _ => MemberState::joining(),
                };
                state.version += bumps;
                state
            })
    }

    /// Plan history of a generated configuration.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum PlanStage {
        Idle,
        Pending { advances: usize },
        Cancelled { advances: usize },
        Completed,
    }

    fn plan_stage() -> impl Strategy<Value = PlanStage> {
        prop_oneof![
            Just(PlanStage::Idle),
            (0usize..3).prop_map(|advances| PlanStage::Pending { advances }),
            (0usize..3).prop_map(|advances| PlanStage::Cancelled { advances }),
            Just(PlanStage::Completed),
        ]
    }

    pub(crate) const PLAN_LENGTH: usize = 3;

    pub(crate) fn plan() -> Vec<ClusterConfigurationChangeOperation> {
        (0..PLAN_LENGTH)
            .map(|i| ClusterConfigurationChangeOperation::MemberLeave {
                member_id: MemberId::from(format!("m{i}")),
            })
            .collect()
    }

    fn advance(mut configuration: ClusterConfiguration, times: usize) -> ClusterConfiguration {
        for i in 0..times {
            configuration = configuration.advance_configuration_change(|c| c, 20 + i as u64);
        }
        configuration
    }

    /// Any initialized configuration: mixed versions, members, routing,
    /// cluster ids, and plans pending, cancelled or completed.
    pub(crate) fn configuration() -> impl Strategy<Value = ClusterConfiguration> {
        (
            prop::collection::btree_map(prop::sample::select(vec!["a", "b", "c", "d"]), member_state(), 0..4),
            prop::option::of(1u32..5),
            prop::option::of(prop::sample::select(vec!["x", "y"])),
            0u64..3,
            plan_stage(),
            0u64..2,
        )
            .prop_map(|(members, routing, cluster_id, skew, stage, trailing)| {
                let mut configuration = ClusterConfiguration::init();
                for (id, state) in members {
                    configuration = configuration.add_member(MemberId::from(id), state);
                }
                if let Some(partitions) = routing {
                    configuration = configuration.set_routing_state(RoutingState::initial(partitions));
                }
                if let Some(id) = cluster_id {
                    configuration = configuration.set_cluster_id_if_absent(id);
                }
                configuration.version += skew;
                configuration = match stage {
                    PlanStage::Idle => configuration,
                    PlanStage::Pending { advances } => advance(started(configuration), advances),
                    PlanStage::Cancelled { advances } => {
                        advance(started(configuration), advances).cancel_pending_changes(30)
                    }
                    PlanStage::Completed => advance(started(configuration), PLAN_LENGTH),
                };
                configuration.version += trailing;
                configuration
            })
    }

    fn started(configuration: ClusterConfiguration) -> ClusterConfiguration {
        let fallback = configuration.clone();
        configuration.start_change(plan(), 10).unwrap_or(fallback)
    }
}
