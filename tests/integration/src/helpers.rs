//! Test helpers for running several members on an in-process network.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ember_cluster::{
    ClusterConfigService, ClusterConfiguration, ClusterSettings, DynamicPartitionConfig,
    ExecutorAppliers, ExecutorResult, LocalNetwork, MemberId, MembershipChangeExecutor,
    PartitionChangeExecutor, PartitionId, ReplicaSet,
};
use futures::future::{self, FutureExt};
use tokio::sync::watch;

/// How long any single expectation may take before the test fails.
pub const WAIT: Duration = Duration::from_secs(10);

pub fn id(s: &str) -> MemberId {
    MemberId::from(s)
}

/// Settings for `local` in a cluster of `members`, coordinated by "0",
/// with one partition per member and fast timers.
pub fn settings(local: &str, members: &[&str]) -> ClusterSettings {
    ClusterSettings {
        member_id: id(local),
        members: members.iter().map(|m| id(m)).collect(),
        coordinator: id("0"),
        partition_count: members.len() as u32,
        replication_factor: 1,
        exporters: BTreeSet::from(["audit".to_owned()]),
        routing_enabled: true,
        sync_interval_ms: 50,
        sync_retry_delay_ms: 50,
        retry_min_ms: 20,
        retry_max_ms: 200,
        ..ClusterSettings::default()
    }
}

/// Spawns a member and makes it reachable on `network`. Not initialized.
pub fn spawn_member(
    network: &LocalNetwork,
    settings: ClusterSettings,
    dir: &Path,
) -> ClusterConfigService {
    let local = settings.member_id.clone();
    let service = ClusterConfigService::spawn(settings, dir, Arc::new(network.endpoint(local)))
        .expect("valid settings");
    network.register(service.gossip().clone());
    service
}

/// A running set of members sharing one network.
pub struct TestCluster {
    pub network: LocalNetwork,
    pub members: Vec<ClusterConfigService>,
    pub dirs: Vec<tempfile::TempDir>,
}

impl TestCluster {
    /// Starts members "0".."n-1" and waits until all are initialized.
    pub async fn start(n: usize) -> Self {
        let dirs = (0..n).map(|_| tempfile::tempdir().unwrap()).collect();
        Self::start_in(dirs).await
    }

    /// Starts one member per directory, reusing whatever is persisted there.
    pub async fn start_in(dirs: Vec<tempfile::TempDir>) -> Self {
        let names: Vec<String> = (0..dirs.len()).map(|i| i.to_string()).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let network = LocalNetwork::new();
        let mut members: Vec<ClusterConfigService> = names
            .iter()
            .zip(&dirs)
            .map(|(name, dir)| spawn_member(&network, settings(name, &names), dir.path()))
            .collect();

        let results = within(future::join_all(members.iter_mut().map(|member| {
            let query = Arc::new(network.endpoint(member.local_id().clone()));
            member.initialize(query)
        })))
        .await;
        for result in results {
            result.expect("member initializes");
        }

        Self {
            network,
            members,
            dirs,
        }
    }

    pub fn coordinator(&self) -> &ClusterConfigService {
        &self.members[0]
    }

    pub fn member(&self, n: usize) -> &ClusterConfigService {
        &self.members[n]
    }

    /// Registers a recording executor on every member.
    pub async fn record_all(&self) -> Vec<Arc<RecordingExecutor>> {
        let mut recorders = Vec::new();
        for member in &self.members {
            recorders.push(record(member).await);
        }
        recorders
    }

    /// Waits until every member has `version` or newer.
    pub async fn converge_on(&self, version: u64) -> Vec<ClusterConfiguration> {
        let mut seen = Vec::new();
        for member in &self.members {
            seen.push(wait_until(member.subscribe(), |c| c.version >= version).await);
        }
        seen
    }

    /// Stops every member and hands back the data directories.
    pub fn shutdown(self) -> Vec<tempfile::TempDir> {
        for member in &self.members {
            self.network.unregister(member.local_id());
        }
        self.dirs
    }
}

/// Registers a fresh [`RecordingExecutor`] as `member`'s change appliers.
pub async fn record(member: &ClusterConfigService) -> Arc<RecordingExecutor> {
    let recorder = Arc::new(RecordingExecutor::default());
    member
        .register_appliers(Arc::new(ExecutorAppliers::new(
            recorder.clone(),
            recorder.clone(),
        )))
        .await
        .unwrap();
    recorder
}

/// Fails the test if `fut` takes longer than [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

/// Waits for a configuration matching `pred`.
pub async fn wait_until(
    mut rx: watch::Receiver<ClusterConfiguration>,
    pred: impl FnMut(&ClusterConfiguration) -> bool,
) -> ClusterConfiguration {
    let seen = within(rx.wait_for(pred))
        .await
        .expect("configuration stream closed")
        .clone();
    seen
}

/// Executor double that records every call and always succeeds.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> ExecutorResult {
        self.calls.lock().unwrap().push(call);
        future::ready(Ok(())).boxed()
    }
}

impl PartitionChangeExecutor for RecordingExecutor {
    fn join(
        &self,
        partition: PartitionId,
        replicas: ReplicaSet,
        _config: DynamicPartitionConfig,
    ) -> ExecutorResult {
        let members: Vec<&str> = replicas.keys().map(MemberId::as_str).collect();
        self.record(format!("join {partition} {}", members.join(",")))
    }

    fn leave(&self, partition: PartitionId, _minimum_allowed_replicas: u32) -> ExecutorResult {
        self.record(format!("leave {partition}"))
    }

    fn bootstrap(
        &self,
        partition: PartitionId,
        priority: u32,
        _config: DynamicPartitionConfig,
    ) -> ExecutorResult {
        self.record(format!("bootstrap {partition} {priority}"))
    }

    fn reconfigure_priority(&self, partition: PartitionId, priority: u32) -> ExecutorResult {
        self.record(format!("priority {partition} {priority}"))
    }

    fn force_reconfigure(&self, partition: PartitionId, members: Vec<MemberId>) -> ExecutorResult {
        self.record(format!("force {partition} {}", members.len()))
    }

    fn enable_exporter(
        &self,
        partition: PartitionId,
        exporter_id: String,
        _metadata_version: u64,
        _initialize_from: Option<String>,
    ) -> ExecutorResult {
        self.record(format!("enable {partition} {exporter_id}"))
    }

    fn disable_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult {
        self.record(format!("disable {partition} {exporter_id}"))
    }

    fn delete_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult {
        self.record(format!("delete {partition} {exporter_id}"))
    }
}

impl MembershipChangeExecutor for RecordingExecutor {
    fn add_member(&self, member: MemberId) -> ExecutorResult {
        self.record(format!("add {member}"))
    }

    fn remove_member(&self, member: MemberId) -> ExecutorResult {
        self.record(format!("remove {member}"))
    }

    fn delete_history(&self) -> ExecutorResult {
        self.record("delete history".to_owned())
    }
}
