//! Executors for a standalone node.
//!
//! A standalone node hosts no partition replicas, so every operation
//! addressed to it only needs acknowledging. The calls are logged so an
//! operator can follow a change plan as it moves through the cluster.

use ember_cluster::{
    DynamicPartitionConfig, ExecutorResult, MemberId, MembershipChangeExecutor,
    PartitionChangeExecutor, PartitionId, ReplicaSet,
};
use futures::future::{self, FutureExt};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

fn done() -> ExecutorResult {
    future::ready(Ok(())).boxed()
}

impl PartitionChangeExecutor for LoggingExecutor {
    fn join(
        &self,
        partition: PartitionId,
        replicas: ReplicaSet,
        config: DynamicPartitionConfig,
    ) -> ExecutorResult {
        info!(
            partition,
            replicas = replicas.len(),
            exporters = config.exporters.len(),
            "joining partition"
        );
        done()
    }

    fn leave(&self, partition: PartitionId, minimum_allowed_replicas: u32) -> ExecutorResult {
        info!(partition, minimum_allowed_replicas, "leaving partition");
        done()
    }

    fn bootstrap(
        &self,
        partition: PartitionId,
        priority: u32,
        config: DynamicPartitionConfig,
    ) -> ExecutorResult {
        info!(
            partition,
            priority,
            exporters = config.exporters.len(),
            "bootstrapping partition"
        );
        done()
    }

    fn reconfigure_priority(&self, partition: PartitionId, priority: u32) -> ExecutorResult {
        info!(partition, priority, "reconfiguring priority");
        done()
    }

    fn force_reconfigure(&self, partition: PartitionId, members: Vec<MemberId>) -> ExecutorResult {
        info!(partition, ?members, "force reconfiguring partition");
        done()
    }

    fn enable_exporter(
        &self,
        partition: PartitionId,
        exporter_id: String,
        metadata_version: u64,
        initialize_from: Option<String>,
    ) -> ExecutorResult {
        info!(
            partition,
            exporter = %exporter_id,
            metadata_version,
            initialize_from = initialize_from.as_deref().unwrap_or("-"),
            "enabling exporter"
        );
        done()
    }

    fn disable_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult {
        info!(partition, exporter = %exporter_id, "disabling exporter");
        done()
    }

    fn delete_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult {
        info!(partition, exporter = %exporter_id, "deleting exporter");
        done()
    }
}

impl MembershipChangeExecutor for LoggingExecutor {
    fn add_member(&self, member: MemberId) -> ExecutorResult {
        info!(%member, "member joining");
        done()
    }

    fn remove_member(&self, member: MemberId) -> ExecutorResult {
        info!(%member, "member leaving");
        done()
    }

    fn delete_history(&self) -> ExecutorResult {
        info!("purging history of departed members");
        done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_succeeds() {
        let executor = LoggingExecutor;
        executor
            .join(1, ReplicaSet::default(), DynamicPartitionConfig::default())
            .await
            .unwrap();
        executor.leave(1, 1).await.unwrap();
        executor.enable_exporter(1, "e".into(), 2, None).await.unwrap();
        executor.add_member(MemberId::from("1")).await.unwrap();
        executor.delete_history().await.unwrap();
    }
}
