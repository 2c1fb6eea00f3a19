//! Static partition placement.

use std::collections::{BTreeMap, BTreeSet};

use crate::member::{MemberId, PartitionId};
use crate::ClusterError;

/// Replicas of one partition: member to replica priority.
pub type ReplicaSet = BTreeMap<MemberId, u32>;

/// Decides which members host which partitions for a fresh cluster.
///
/// Implementations must place every partition on exactly
/// `replication_factor` distinct members drawn from `members`, and must be
/// deterministic: every member computing a distribution from the same
/// inputs gets the same answer.
pub trait PartitionDistributor: Send + Sync {
    fn distribute(
        &self,
        members: &BTreeSet<MemberId>,
        partition_count: u32,
        replication_factor: u32,
    ) -> Result<BTreeMap<PartitionId, ReplicaSet>, ClusterError>;
}

/// Places partition `p` on the `replication_factor` members starting at
/// position `p - 1` of the sorted member list, wrapping around.
///
/// The first replica gets priority `replication_factor`, the next one less,
/// down to 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinDistributor;

impl PartitionDistributor for RoundRobinDistributor {
    fn distribute(
        &self,
        members: &BTreeSet<MemberId>,
        partition_count: u32,
        replication_factor: u32,
    ) -> Result<BTreeMap<PartitionId, ReplicaSet>, ClusterError> {
        validate(members, partition_count, replication_factor)?;
        let sorted: Vec<&MemberId> = members.iter().collect();
        let n = sorted.len();

        let mut distribution = BTreeMap::new();
        for partition in 1..=partition_count {
            let start = (partition as usize - 1) % n;
            let replicas = (0..replication_factor as usize)
                .map(|i| {
                    let member = sorted[(start + i) % n].clone();
                    (member, replication_factor - i as u32)
                })
                .collect();
            distribution.insert(partition, replicas);
        }
        Ok(distribution)
    }
}

fn validate(
    members: &BTreeSet<MemberId>,
    partition_count: u32,
    replication_factor: u32,
) -> Result<(), ClusterError> {
    if members.is_empty() {
        return Err(ClusterError::Configuration("member set is empty".into()));
    }
    if partition_count == 0 {
        return Err(ClusterError::Configuration(
            "partition count must be at least 1".into(),
        ));
    }
    if replication_factor == 0 {
        return Err(ClusterError::Configuration(
            "replication factor must be at least 1".into(),
        ));
    }
    if replication_factor as usize > members.len() {
        return Err(ClusterError::Configuration(format!(
            "replication factor {replication_factor} exceeds member count {}",
            members.len()
        )));
    }
    Ok(())
}
