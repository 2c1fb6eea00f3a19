//! Request routing metadata.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::member::PartitionId;

/// How requests and messages are distributed over partitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingState {
    pub version: u64,
    pub request_handling: RequestHandling,
    pub message_correlation: MessageCorrelation,
}

/// Which partitions accept new requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestHandling {
    /// Every partition from 1 to `partition_count` is active.
    AllPartitions { partition_count: u32 },
    /// Partitions `1..=base_partition_count` plus `additional_active`,
    /// minus `inactive`.
    ActivePartitions {
        base_partition_count: u32,
        additional_active: BTreeSet<PartitionId>,
        inactive: BTreeSet<PartitionId>,
    },
}

/// How message correlation keys map to partitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageCorrelation {
    HashMod { partition_count: u32 },
}

impl RoutingState {
    /// Routing for a fresh cluster with `partition_count` partitions.
    pub fn initial(partition_count: u32) -> Self {
        Self {
            version: 1,
            request_handling: RequestHandling::AllPartitions { partition_count },
            message_correlation: MessageCorrelation::HashMod { partition_count },
        }
    }

    /// Returns the set of partitions that accept new requests.
    pub fn active_partitions(&self) -> BTreeSet<PartitionId> {
        match &self.request_handling {
            RequestHandling::AllPartitions { partition_count } => {
                (1..=*partition_count).collect()
            }
            RequestHandling::ActivePartitions {
                base_partition_count,
                additional_active,
                inactive,
            } => (1..=*base_partition_count)
                .chain(additional_active.iter().copied())
                .filter(|p| !inactive.contains(p))
                .collect(),
        }
    }

    /// Merges two routing states: the higher version wins, ties go to the
    /// greater value.
    pub fn merge(self, other: RoutingState) -> RoutingState {
        if (other.version, &other) > (self.version, &self) {
            other
        } else {
            self
        }
    }
}
