//! Configuration change operations.
//!
//! A change plan is an ordered list of these. Each one is a single atomic
//! step executed by exactly one member: the member named by `member_id`.

use serde::{Deserialize, Serialize};

use crate::member::{DynamicPartitionConfig, MemberId, PartitionId};
use crate::routing::RoutingState;

/// One step of a configuration change plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterConfigurationChangeOperation {
    /// `member_id` joins the cluster.
    MemberJoin { member_id: MemberId },

    /// `member_id` leaves the cluster. It must not host any partitions.
    MemberLeave { member_id: MemberId },

    /// `member_id` removes `member_to_remove` from the cluster.
    MemberRemove {
        member_id: MemberId,
        member_to_remove: MemberId,
    },

    /// `member_id` starts hosting a replica of `partition_id`.
    PartitionJoin {
        member_id: MemberId,
        partition_id: PartitionId,
        priority: u32,
    },

    /// `member_id` stops hosting its replica of `partition_id`.
    PartitionLeave {
        member_id: MemberId,
        partition_id: PartitionId,
        minimum_allowed_replicas: u32,
    },

    /// Changes the priority of `member_id`'s replica of `partition_id`.
    PartitionReconfigurePriority {
        member_id: MemberId,
        partition_id: PartitionId,
        priority: u32,
    },

    /// Forces `partition_id` down to the given replica set, without
    /// consulting the removed replicas.
    PartitionForceReconfigure {
        member_id: MemberId,
        partition_id: PartitionId,
        members: Vec<MemberId>,
    },

    /// Creates a brand new partition with `member_id` as its first replica.
    PartitionBootstrap {
        member_id: MemberId,
        partition_id: PartitionId,
        priority: u32,
        config: Option<DynamicPartitionConfig>,
    },

    PartitionEnableExporter {
        member_id: MemberId,
        partition_id: PartitionId,
        exporter_id: String,
        initialize_from: Option<String>,
    },

    PartitionDisableExporter {
        member_id: MemberId,
        partition_id: PartitionId,
        exporter_id: String,
    },

    PartitionDeleteExporter {
        member_id: MemberId,
        partition_id: PartitionId,
        exporter_id: String,
    },

    /// Prunes members that have left, and their local history.
    DeleteHistory { member_id: MemberId },

    /// Installs new routing state. `None` derives it from the partitions
    /// currently hosted.
    UpdateRoutingState {
        member_id: MemberId,
        routing_state: Option<RoutingState>,
    },
}

impl ClusterConfigurationChangeOperation {
    /// Returns the member that executes this operation.
    pub fn member_id(&self) -> &MemberId {
        use ClusterConfigurationChangeOperation::*;
        match self {
            MemberJoin { member_id }
            | MemberLeave { member_id }
            | MemberRemove { member_id, .. }
            | PartitionJoin { member_id, .. }
            | PartitionLeave { member_id, .. }
            | PartitionReconfigurePriority { member_id, .. }
            | PartitionForceReconfigure { member_id, .. }
            | PartitionBootstrap { member_id, .. }
            | PartitionEnableExporter { member_id, .. }
            | PartitionDisableExporter { member_id, .. }
            | PartitionDeleteExporter { member_id, .. }
            | DeleteHistory { member_id }
            | UpdateRoutingState { member_id, .. } => member_id,
        }
    }

    /// Returns a short, stable name for logging.
    pub fn name(&self) -> &'static str {
        use ClusterConfigurationChangeOperation::*;
        match self {
            MemberJoin { .. } => "member-join",
            MemberLeave { .. } => "member-leave",
            MemberRemove { .. } => "member-remove",
            PartitionJoin { .. } => "partition-join",
            PartitionLeave { .. } => "partition-leave",
            PartitionReconfigurePriority { .. } => "partition-reconfigure-priority",
            PartitionForceReconfigure { .. } => "partition-force-reconfigure",
            PartitionBootstrap { .. } => "partition-bootstrap",
            PartitionEnableExporter { .. } => "partition-enable-exporter",
            PartitionDisableExporter { .. } => "partition-disable-exporter",
            PartitionDeleteExporter { .. } => "partition-delete-exporter",
            DeleteHistory { .. } => "delete-history",
            UpdateRoutingState { .. } => "update-routing-state",
        }
    }

    /// Returns the partition this operation targets, if any.
    pub fn partition_id(&self) -> Option<PartitionId> {
        use ClusterConfigurationChangeOperation::*;
        match self {
            PartitionJoin { partition_id, .. }
            | PartitionLeave { partition_id, .. }
            | PartitionReconfigurePriority { partition_id, .. }
            | PartitionForceReconfigure { partition_id, .. }
            | PartitionBootstrap { partition_id, .. }
            | PartitionEnableExporter { partition_id, .. }
            | PartitionDisableExporter { partition_id, .. }
            | PartitionDeleteExporter { partition_id, .. } => Some(*partition_id),
            MemberJoin { .. }
            | MemberLeave { .. }
            | MemberRemove { .. }
            | DeleteHistory { .. }
            | UpdateRoutingState { .. } => None,
        }
    }
}

impl std::fmt::Display for ClusterConfigurationChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.partition_id() {
            Some(p) => write!(f, "{} on {} for partition {}", self.name(), self.member_id(), p),
            None => write!(f, "{} on {}", self.name(), self.member_id()),
        }
    }
}
