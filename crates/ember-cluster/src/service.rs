//! Service wiring.
//!
//! [`ClusterConfigService`] runs a full member: gossip, the manager, the
//! initialization pipeline, and the change coordinator. [`ObserverService`]
//! only listens to gossip and keeps a merged, read-only view.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ember_persistence::MetaFile;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::applier::ChangeAppliers;
use crate::configuration::ClusterConfiguration;
use crate::coordinator::ChangeCoordinator;
use crate::distribution::{PartitionDistributor, RoundRobinDistributor};
use crate::error::ErrorKind;
use crate::gossip::{spawn_gossip, ConfigGossip, GossipConfig, GossipHandle};
use crate::init::{
    cluster_id_modifier, exporter_state_modifier, file_initializer, gossip_initializer,
    routing_state_modifier, static_initializer, sync_initializer, Initializer,
    StaticConfiguration,
};
use crate::manager::{
    spawn_manager, ConfigurationManager, InconsistentConfigurationListener, ListenerId,
    ManagerHandle,
};
use crate::member::MemberId;
use crate::operation::ClusterConfigurationChangeOperation;
use crate::persisted::{PersistedClusterConfiguration, META_FILE_NAME};
use crate::settings::ClusterSettings;
use crate::transport::{ConfigurationQuery, GossipTransport};
use crate::ClusterError;

/// Capacity of the command and event queues between actors.
const CHANNEL_BUFFER: usize = 256;

/// A member's configuration management.
pub struct ClusterConfigService {
    settings: ClusterSettings,
    gossip: GossipHandle,
    manager: ManagerHandle,
    coordinator: ChangeCoordinator,
    distributor: Arc<dyn PartitionDistributor>,
    meta_path: PathBuf,
    initialized: bool,
}

impl ClusterConfigService {
    /// Starts gossip and the manager. The configuration stays uninitialized
    /// until [`initialize`](Self::initialize) succeeds.
    ///
    /// The persisted file lives in `data_dir`. It is not read here.
    pub fn spawn(
        settings: ClusterSettings,
        data_dir: &Path,
        transport: Arc<dyn GossipTransport>,
    ) -> Result<Self, ClusterError> {
        settings.validate()?;
        let local = settings.member_id.clone();

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);
        let engine = ConfigGossip::new(
            local.clone(),
            settings.peers(),
            settings.gossip_config(),
            event_tx,
        );
        let gossip = spawn_gossip(engine, transport, CHANNEL_BUFFER);

        let meta_path = data_dir.join(META_FILE_NAME);
        let persisted = PersistedClusterConfiguration::new(&meta_path);
        let manager = ConfigurationManager::new(local, persisted, gossip.clone(), settings.backoff());
        let manager = spawn_manager(manager, event_rx, CHANNEL_BUFFER);
        let coordinator = ChangeCoordinator::new(settings.coordinator.clone(), manager.clone());

        Ok(Self {
            settings,
            gossip,
            manager,
            coordinator,
            distributor: Arc::new(RoundRobinDistributor),
            meta_path,
            initialized: false,
        })
    }

    /// Replaces the partition distributor used when generating a new cluster.
    pub fn with_distributor(mut self, distributor: Arc<dyn PartitionDistributor>) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn local_id(&self) -> &MemberId {
        &self.settings.member_id
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// The gossip actor. Hosts deliver inbound gossip messages to it.
    pub fn gossip(&self) -> &GossipHandle {
        &self.gossip
    }

    /// Runs the initialization pipeline for this member.
    ///
    /// Fails if no configuration could be loaded, synced or generated.
    pub async fn initialize(
        &mut self,
        query: Arc<dyn ConfigurationQuery>,
    ) -> Result<ClusterConfiguration, ClusterError> {
        let pipeline = self.pipeline(query);
        let configuration = self.manager.initialize(pipeline).await?;
        self.initialized = true;
        info!(
            member = %self.settings.member_id,
            version = configuration.version,
            coordinator = self.coordinator.is_coordinator(),
            "configuration service started"
        );
        Ok(configuration)
    }

    fn pipeline(&self, query: Arc<dyn ConfigurationQuery>) -> Initializer {
        let settings = &self.settings;
        let file = MetaFile::new(&self.meta_path);
        let sync = sync_initializer(
            query,
            settings.peers(),
            settings.sync_retry_delay(),
            self.gossip.subscribe(),
        );
        let loaded = file_initializer(file).recover(ErrorKind::Broken, sync);

        let pipeline = if self.coordinator.is_coordinator() {
            debug!("using coordinator initialization");
            loaded
                .or_then(static_initializer(StaticConfiguration {
                    members: settings.members.clone(),
                    partition_count: settings.partition_count,
                    replication_factor: settings.replication_factor,
                    exporters: settings.exporters.clone(),
                    distributor: Arc::clone(&self.distributor),
                }))
        } else {
            loaded.or_then(gossip_initializer(self.gossip.clone()))
        };

        let pipeline = pipeline
            .and_then(exporter_state_modifier(
                settings.member_id.clone(),
                settings.exporters.clone(),
            ))
            .and_then(routing_state_modifier(settings.routing_enabled));
        if self.coordinator.is_coordinator() {
            pipeline.and_then(cluster_id_modifier(settings.cluster_id.clone()))
        } else {
            pipeline
        }
    }

    fn ensure_initialized(&self) -> Result<(), ClusterError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ClusterError::Uninitialized)
        }
    }

    pub async fn configuration(&self) -> Result<ClusterConfiguration, ClusterError> {
        self.manager.configuration().await
    }

    /// Watches the local configuration.
    pub fn subscribe(&self) -> watch::Receiver<ClusterConfiguration> {
        self.manager.subscribe()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.is_coordinator()
    }

    pub async fn start_change(
        &self,
        operations: Vec<ClusterConfigurationChangeOperation>,
    ) -> Result<ClusterConfiguration, ClusterError> {
        self.ensure_initialized()?;
        self.coordinator.start_change(operations).await
    }

    pub async fn cancel_change(&self, change_id: u64) -> Result<ClusterConfiguration, ClusterError> {
        self.ensure_initialized()?;
        self.coordinator.cancel_change(change_id).await
    }

    pub async fn register_appliers(&self, appliers: Arc<dyn ChangeAppliers>) -> Result<(), ClusterError> {
        self.ensure_initialized()?;
        self.manager.register_appliers(appliers).await
    }

    pub async fn remove_appliers(&self) -> Result<(), ClusterError> {
        self.manager.remove_appliers().await
    }

    pub async fn add_listener(
        &self,
        listener: Arc<dyn InconsistentConfigurationListener>,
    ) -> Result<ListenerId, ClusterError> {
        self.manager.add_listener(listener).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<(), ClusterError> {
        self.manager.remove_listener(id).await
    }
}

/// A read-only participant: merges what it hears, never persists, never
/// applies, never starts changes.
pub struct ObserverService {
    gossip: GossipHandle,
    view: watch::Receiver<ClusterConfiguration>,
}

impl ObserverService {
    /// Starts gossiping with `members` as `local_id`.
    pub fn spawn(
        local_id: MemberId,
        members: BTreeSet<MemberId>,
        config: GossipConfig,
        transport: Arc<dyn GossipTransport>,
    ) -> Self {
        // nobody consumes per-message events; the merged view is enough
        let (event_tx, _) = mpsc::channel(1);
        let engine = ConfigGossip::new(local_id, members.into_iter().collect(), config, event_tx);
        let gossip = spawn_gossip(engine, transport, CHANNEL_BUFFER);

        let (view_tx, view) = watch::channel(ClusterConfiguration::uninitialized());
        let mut gossip_view = gossip.subscribe();
        tokio::spawn(async move {
            loop {
                let merged = gossip_view.borrow_and_update().merged.clone();
                view_tx.send_if_modified(|current| {
                    if *current == merged {
                        return false;
                    }
                    *current = merged;
                    true
                });
                tokio::select! {
                    changed = gossip_view.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = view_tx.closed() => break,
                }
            }
        });

        Self { gossip, view }
    }

    pub fn local_id(&self) -> &MemberId {
        self.gossip.local_id()
    }

    /// The gossip actor. Hosts deliver inbound gossip messages to it.
    pub fn gossip(&self) -> &GossipHandle {
        &self.gossip
    }

    /// The merged configuration heard so far. Uninitialized until some
    /// member has gossiped with us.
    pub fn configuration(&self) -> ClusterConfiguration {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClusterConfiguration> {
        self.view.clone()
    }

    /// Waits until some initialized configuration has been heard.
    pub async fn wait_initialized(&self) -> Result<ClusterConfiguration, ClusterError> {
        let mut view = self.view.clone();
        let configuration = view
            .wait_for(|c| !c.is_uninitialized())
            .await
            .map_err(|_| ClusterError::Unavailable)?;
        Ok(configuration.clone())
    }
}
