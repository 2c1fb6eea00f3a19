//! Startup initialization pipeline.
//!
//! An [`Initializer`] produces the configuration a member starts with. It
//! either yields a configuration (possibly the uninitialized one, meaning
//! "I don't know") or fails with a [`ClusterError`]. Initializers compose:
//!
//! - [`or_then`](Initializer::or_then) falls through to another initializer
//!   on an uninitialized result,
//! - [`and_then`](Initializer::and_then) post-processes an initialized
//!   result,
//! - [`recover`](Initializer::recover) switches to a fallback on an error
//!   of a given [`ErrorKind`].
//!
//! The coordinator starts from
//! `file.recover(Broken, sync).or_then(static).and_then(exporters).and_then(routing)`,
//! every other member uses gossip in place of static generation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ember_persistence::MetaFile;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::configuration::ClusterConfiguration;
use crate::distribution::PartitionDistributor;
use crate::error::ErrorKind;
use crate::gossip::{GossipHandle, GossipView};
use crate::member::{
    DynamicPartitionConfig, ExporterState, ExporterStatus, MemberId, MemberState, PartitionState,
};
use crate::persisted::read_configuration;
use crate::routing::RoutingState;
use crate::transport::ConfigurationQuery;
use crate::ClusterError;

pub type InitResult = Result<ClusterConfiguration, ClusterError>;

/// A deferred, one-shot source of a starting configuration.
pub struct Initializer {
    run: Box<dyn FnOnce() -> BoxFuture<'static, InitResult> + Send>,
}

impl Initializer {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = InitResult> + Send + 'static,
    {
        Self {
            run: Box::new(move || Box::pin(f())),
        }
    }

    /// An initializer that always yields `configuration`.
    pub fn fixed(configuration: ClusterConfiguration) -> Self {
        Self::new(move || async move { Ok(configuration) })
    }

    /// Runs the initializer.
    pub async fn initialize(self) -> InitResult {
        (self.run)().await
    }

    /// Runs `next` if this one yields the uninitialized configuration.
    pub fn or_then(self, next: Initializer) -> Initializer {
        Initializer::new(move || async move {
            let configuration = self.initialize().await?;
            if configuration.is_uninitialized() {
                next.initialize().await
            } else {
                Ok(configuration)
            }
        })
    }

    /// Passes an initialized result through `modifier`.
    pub fn and_then<M>(self, modifier: M) -> Initializer
    where
        M: FnOnce(ClusterConfiguration) -> ClusterConfiguration + Send + 'static,
    {
        Initializer::new(move || async move {
            let configuration = self.initialize().await?;
            if configuration.is_uninitialized() {
                Ok(configuration)
            } else {
                Ok(modifier(configuration))
            }
        })
    }

    /// Runs `fallback` if this one fails with an error of `kind`.
    pub fn recover(self, kind: ErrorKind, fallback: Initializer) -> Initializer {
        Initializer::new(move || async move {
            match self.initialize().await {
                Err(e) if e.kind() == kind => {
                    warn!("initialization failed ({e}), falling back");
                    fallback.initialize().await
                }
                other => other,
            }
        })
    }
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer").finish_non_exhaustive()
    }
}

// -- strategies --

/// Loads the configuration persisted in `file`.
///
/// A missing file yields the uninitialized configuration. A corrupt one is
/// an error of kind [`ErrorKind::Broken`].
pub fn file_initializer(file: MetaFile) -> Initializer {
    Initializer::new(move || async move {
        let configuration = read_configuration(&file)?;
        if configuration.is_uninitialized() {
            debug!(path = %file.path().display(), "no persisted configuration");
        } else {
            info!(
                version = configuration.version,
                path = %file.path().display(),
                "loaded persisted configuration"
            );
        }
        Ok(configuration)
    })
}

/// Asks every peer for its configuration.
///
/// The first answer decides: an initialized configuration is adopted, an
/// uninitialized one means nobody knows yet. Peers that don't answer are
/// asked again every `retry_delay`. Gossip received meanwhile counts as an
/// answer too. Outstanding queries are dropped as soon as there is a
/// result.
pub fn sync_initializer(
    query: Arc<dyn ConfigurationQuery>,
    peers: Vec<MemberId>,
    retry_delay: Duration,
    mut gossip_view: watch::Receiver<GossipView>,
) -> Initializer {
    Initializer::new(move || async move {
        if peers.is_empty() {
            info!("no peers to sync configuration from");
            return Ok(ClusterConfiguration::uninitialized());
        }

        let known: BTreeSet<MemberId> = peers.iter().cloned().collect();
        let mut queries: FuturesUnordered<_> = peers
            .into_iter()
            .map(|peer| query_until_answered(Arc::clone(&query), peer, retry_delay))
            .collect();

        if let Some(result) = resolve_from_view(&gossip_view.borrow_and_update(), &known) {
            return Ok(result);
        }

        let mut watching = true;
        loop {
            tokio::select! {
                Some((peer, configuration)) = queries.next() => {
                    if configuration.is_uninitialized() {
                        info!(peer = %peer, "peer has no configuration either");
                    } else {
                        info!(peer = %peer, version = configuration.version, "synced configuration from peer");
                    }
                    return Ok(configuration);
                }

                changed = gossip_view.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    if let Some(result) = resolve_from_view(&gossip_view.borrow_and_update(), &known) {
                        info!(version = result.version, "configuration resolved through gossip");
                        return Ok(result);
                    }
                }

                else => return Ok(ClusterConfiguration::uninitialized()),
            }
        }
    })
}

fn resolve_from_view(view: &GossipView, known: &BTreeSet<MemberId>) -> Option<ClusterConfiguration> {
    if !view.merged.is_uninitialized() {
        return Some(view.merged.clone());
    }
    if view.uninitialized_peers.iter().any(|p| known.contains(p)) {
        return Some(ClusterConfiguration::uninitialized());
    }
    None
}

async fn query_until_answered(
    query: Arc<dyn ConfigurationQuery>,
    peer: MemberId,
    retry_delay: Duration,
) -> (MemberId, ClusterConfiguration) {
    loop {
        match query.query_configuration(&peer).await {
            Ok(configuration) => return (peer, configuration),
            Err(e) => {
                debug!(peer = %peer, "configuration query failed: {e}");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Waits until gossip delivers an initialized configuration.
///
/// If gossip itself holds nothing yet, announces that to every peer first
/// so a coordinator syncing from us isn't left waiting.
pub fn gossip_initializer(gossip: GossipHandle) -> Initializer {
    Initializer::new(move || async move {
        let mut view = gossip.subscribe();
        if gossip.current().await?.is_uninitialized() {
            gossip.announce().await?;
        }
        loop {
            {
                let seen = view.borrow_and_update();
                if !seen.merged.is_uninitialized() {
                    info!(version = seen.merged.version, "received configuration through gossip");
                    return Ok(seen.merged.clone());
                }
            }
            view.changed().await.map_err(|_| ClusterError::Unavailable)?;
        }
    })
}

/// Inputs for generating a brand new configuration.
#[derive(Clone)]
pub struct StaticConfiguration {
    pub members: BTreeSet<MemberId>,
    pub partition_count: u32,
    pub replication_factor: u32,
    /// Exporters enabled on every partition of the new cluster.
    pub exporters: BTreeSet<String>,
    pub distributor: Arc<dyn PartitionDistributor>,
}

impl StaticConfiguration {
    /// Builds the configuration. Deterministic in its inputs.
    pub fn generate(&self) -> InitResult {
        let distribution = self.distributor.distribute(
            &self.members,
            self.partition_count,
            self.replication_factor,
        )?;
        let partition_config = DynamicPartitionConfig::with_enabled_exporters(self.exporters.iter().cloned());

        let mut configuration = ClusterConfiguration::init();
        for member in &self.members {
            let partitions = distribution
                .iter()
                .filter_map(|(partition, replicas)| {
                    replicas.get(member).map(|priority| {
                        (*partition, PartitionState::active(*priority, partition_config.clone()))
                    })
                })
                .collect();
            configuration = configuration.add_member(member.clone(), MemberState::active(partitions));
        }
        Ok(configuration)
    }
}

/// Generates a new configuration from static settings.
pub fn static_initializer(settings: StaticConfiguration) -> Initializer {
    Initializer::new(move || async move {
        let configuration = settings.generate()?;
        info!(
            members = settings.members.len(),
            partitions = settings.partition_count,
            replication_factor = settings.replication_factor,
            "generated initial configuration"
        );
        Ok(configuration)
    })
}

// -- modifiers --

/// Reconciles the exporters recorded for `local`'s partitions with the
/// exporters configured on this member.
///
/// New exporters are enabled, exporters no longer configured are marked
/// [`ExporterStatus::ConfigNotFound`] with their history kept, and those
/// configured again are re-enabled at their previous metadata version.
pub fn exporter_state_modifier(
    local: MemberId,
    configured: BTreeSet<String>,
) -> impl FnOnce(ClusterConfiguration) -> ClusterConfiguration + Send + 'static {
    move |configuration| {
        let Some(member) = configuration.member(&local) else {
            return configuration;
        };
        let mut updated = member.clone();
        let mut changed = false;
        for (partition, state) in &member.partitions {
            let reconciled = reconcile_exporters(&state.config, &configured);
            if reconciled != state.config {
                updated = updated.update_partition(*partition, |p| p.update_config(|_| reconciled));
                changed = true;
            }
        }
        if changed {
            debug!(member = %local, "reconciled exporter state");
            configuration.add_member(local, updated)
        } else {
            configuration
        }
    }
}

fn reconcile_exporters(
    current: &DynamicPartitionConfig,
    configured: &BTreeSet<String>,
) -> DynamicPartitionConfig {
    let mut exporters = current.exporters.clone();
    for (name, state) in exporters.iter_mut() {
        if !configured.contains(name) {
            state.status = ExporterStatus::ConfigNotFound;
        } else if state.status == ExporterStatus::ConfigNotFound {
            state.status = ExporterStatus::Enabled;
        }
    }
    for name in configured {
        exporters
            .entry(name.clone())
            .or_insert_with(|| ExporterState::enabled(0, None));
    }
    DynamicPartitionConfig { exporters }
}

/// Initializes routing state once, when enabled and not yet present.
pub fn routing_state_modifier(
    enabled: bool,
) -> impl FnOnce(ClusterConfiguration) -> ClusterConfiguration + Send + 'static {
    move |configuration| {
        if !enabled || configuration.routing_state.is_some() {
            return configuration;
        }
        let partition_count = configuration.partition_ids().len() as u32;
        info!(partition_count, "initializing routing state");
        configuration.set_routing_state(RoutingState::initial(partition_count))
    }
}

/// Stamps a cluster id once. A random one is generated when none is given.
pub fn cluster_id_modifier(
    cluster_id: Option<String>,
) -> impl FnOnce(ClusterConfiguration) -> ClusterConfiguration + Send + 'static {
    move |configuration| {
        if configuration.cluster_id.is_some() {
            return configuration;
        }
        let id = cluster_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(cluster_id = %id, "assigned cluster id");
        configuration.set_cluster_id_if_absent(id)
    }
}
