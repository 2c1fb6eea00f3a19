//! ember-cluster: cluster configuration management for ember.
//!
//! Every member keeps a versioned [`ClusterConfiguration`] describing the
//! members of the cluster, the partitions each of them hosts, and any
//! configuration change in progress. Members converge on it through gossip.
//!
//! # Architecture
//!
//! - **Value model**: configurations are immutable values. Every change
//!   produces a new one, and any two can be merged commutatively.
//! - **Persistence**: the local configuration is written to a checksummed
//!   file before it is gossiped, and read back on restart.
//! - **Initialization**: a composable pipeline loads, syncs, or generates
//!   the starting configuration.
//! - **Changes**: a designated coordinator starts change plans. Each member
//!   applies the operations addressed to it, one at a time.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ember_cluster::{ClusterConfigService, ClusterSettings, LocalNetwork};
//!
//! let network = LocalNetwork::new();
//! let settings = ClusterSettings::default();
//! let local = settings.member_id.clone();
//! let mut service = ClusterConfigService::spawn(settings, data_dir, Arc::new(network.endpoint(local.clone())))?;
//! network.register(service.gossip().clone());
//! let configuration = service.initialize(Arc::new(network.endpoint(local))).await?;
//! ```

mod applier;
mod backoff;
mod change;
mod codec;
mod configuration;
mod coordinator;
mod distribution;
mod error;
mod gossip;
mod init;
mod manager;
mod member;
mod message;
mod operation;
mod persisted;
mod routing;
mod service;
mod settings;
mod transport;

pub use applier::{
    complete, prepare, simulate, ChangeAppliers, ConfigTransformer, Effect, ExecutorAppliers,
    ExecutorResult, MembershipChangeExecutor, OperationApplier, PartitionChangeExecutor, Prepared,
};
pub use backoff::ExponentialBackoff;
pub use change::{now_ms, ChangeStatus, ClusterChangePlan, CompletedChange, CompletedOperation};
pub use configuration::{ClusterConfiguration, UNINITIALIZED_VERSION};
pub use coordinator::ChangeCoordinator;
pub use distribution::{PartitionDistributor, ReplicaSet, RoundRobinDistributor};
pub use error::{ClusterError, ErrorKind};
pub use gossip::{
    spawn_gossip, ConfigGossip, GossipConfig, GossipEvent, GossipHandle, GossipView,
};
pub use init::{
    cluster_id_modifier, exporter_state_modifier, file_initializer, gossip_initializer,
    routing_state_modifier, static_initializer, sync_initializer, InitResult, Initializer,
    StaticConfiguration,
};
pub use manager::{
    spawn_manager, ConfigurationManager, InconsistentConfigurationListener, ListenerId,
    ManagerHandle, UpdateFn,
};
pub use member::{
    DynamicPartitionConfig, ExporterState, ExporterStatus, MemberId, MemberState, MemberStatus,
    PartitionId, PartitionState, PartitionStatus,
};
pub use message::GossipMessage;
pub use operation::ClusterConfigurationChangeOperation;
pub use persisted::{read_configuration, PersistedClusterConfiguration, META_FILE_NAME};
pub use routing::{MessageCorrelation, RequestHandling, RoutingState};
pub use service::{ClusterConfigService, ObserverService};
pub use settings::ClusterSettings;
pub use transport::{ConfigurationQuery, GossipTransport, LocalEndpoint, LocalNetwork};
