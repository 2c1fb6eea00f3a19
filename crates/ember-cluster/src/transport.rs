//! Seams to the network.
//!
//! Configuration management doesn't own sockets. Hosts provide a
//! [`GossipTransport`] to carry gossip messages and a
//! [`ConfigurationQuery`] for bootstrap queries, and feed inbound messages
//! to the local [`GossipHandle`].
//!
//! [`LocalNetwork`] connects members running in one process. It is what
//! the tests use, and is good enough for embedding several members in a
//! single binary.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use futures::future::{self, BoxFuture, FutureExt};

use crate::configuration::ClusterConfiguration;
use crate::gossip::GossipHandle;
use crate::member::MemberId;
use crate::message::GossipMessage;
use crate::ClusterError;

/// Fire-and-forget delivery of gossip messages to a peer.
///
/// Delivery may be lost, duplicated, or reordered. Gossip repairs all of
/// that on later rounds.
pub trait GossipTransport: Send + Sync + 'static {
    fn send(&self, to: &MemberId, message: GossipMessage) -> BoxFuture<'static, Result<(), ClusterError>>;
}

/// Request/response lookup of a peer's current configuration.
pub trait ConfigurationQuery: Send + Sync + 'static {
    fn query_configuration(
        &self,
        peer: &MemberId,
    ) -> BoxFuture<'static, Result<ClusterConfiguration, ClusterError>>;
}

#[derive(Default)]
struct NetworkState {
    members: HashMap<MemberId, GossipHandle>,
    isolated: HashSet<MemberId>,
}

impl NetworkState {
    fn route(&self, from: &MemberId, to: &MemberId) -> Result<GossipHandle, ClusterError> {
        if self.isolated.contains(from) || self.isolated.contains(to) {
            return Err(ClusterError::Transport(format!("{to} is unreachable")));
        }
        self.members
            .get(to)
            .cloned()
            .ok_or_else(|| ClusterError::Transport(format!("unknown member {to}")))
    }
}

/// An in-process network of gossip actors.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a member reachable under its id.
    pub fn register(&self, handle: GossipHandle) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.members.insert(handle.local_id().clone(), handle);
    }

    pub fn unregister(&self, id: &MemberId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.members.remove(id);
    }

    /// Cuts a member off: nothing it sends arrives, nothing reaches it.
    pub fn isolate(&self, id: &MemberId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.isolated.insert(id.clone());
    }

    pub fn heal(&self, id: &MemberId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.isolated.remove(id);
    }

    /// Returns the network as seen by `local`.
    pub fn endpoint(&self, local: MemberId) -> LocalEndpoint {
        LocalEndpoint {
            local,
            network: self.clone(),
        }
    }

    fn route(&self, from: &MemberId, to: &MemberId) -> Result<GossipHandle, ClusterError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.route(from, to)
    }
}

/// One member's connection to a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalEndpoint {
    local: MemberId,
    network: LocalNetwork,
}

impl GossipTransport for LocalEndpoint {
    fn send(&self, to: &MemberId, message: GossipMessage) -> BoxFuture<'static, Result<(), ClusterError>> {
        // never wait on a peer's queue: two actors sending to each other
        // with full queues would deadlock
        let result = self
            .network
            .route(&self.local, to)
            .and_then(|handle| handle.try_receive(message));
        future::ready(result).boxed()
    }
}

impl ConfigurationQuery for LocalEndpoint {
    fn query_configuration(
        &self,
        peer: &MemberId,
    ) -> BoxFuture<'static, Result<ClusterConfiguration, ClusterError>> {
        match self.network.route(&self.local, peer) {
            Ok(handle) => async move { handle.current().await }.boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::gossip::{spawn_gossip, ConfigGossip, GossipConfig, GossipEvent};
    use crate::member::MemberState;

    fn spawn_member(
        network: &LocalNetwork,
        id: &str,
        peers: &[&str],
    ) -> (GossipHandle, mpsc::Receiver<GossipEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = GossipConfig {
            sync_interval: Duration::from_secs(3600),
            fanout: 4,
        };
        let engine = ConfigGossip::new(
            MemberId::from(id),
            peers.iter().map(|&p| MemberId::from(p)).collect(),
            config,
            event_tx,
        );
        let handle = spawn_gossip(engine, Arc::new(network.endpoint(MemberId::from(id))), 64);
        network.register(handle.clone());
        (handle, event_rx)
    }

    fn sample() -> ClusterConfiguration {
        ClusterConfiguration::init().add_member(MemberId::from("a"), MemberState::active(Default::default()))
    }

    #[tokio::test]
    async fn push_reaches_peer() {
        let network = LocalNetwork::new();
        let (a, _a_events) = spawn_member(&network, "a", &["b"]);
        let (_b, mut b_events) = spawn_member(&network, "b", &["a"]);

        a.update(sample()).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        let GossipEvent::ConfigurationReceived { from, configuration } = event;
        assert_eq!(from, MemberId::from("a"));
        assert_eq!(configuration, sample());
    }

    #[tokio::test]
    async fn query_returns_current_state() {
        let network = LocalNetwork::new();
        let (a, _a_events) = spawn_member(&network, "a", &["b"]);
        let (_b, _b_events) = spawn_member(&network, "b", &["a"]);
        let b_endpoint = network.endpoint(MemberId::from("b"));

        let before = b_endpoint.query_configuration(&MemberId::from("a")).await.unwrap();
        assert!(before.is_uninitialized());

        a.update(sample()).await.unwrap();
        let after = b_endpoint.query_configuration(&MemberId::from("a")).await.unwrap();
        assert_eq!(after, sample());
    }

    #[tokio::test]
    async fn isolated_member_is_unreachable() {
        let network = LocalNetwork::new();
        let (_a, _a_events) = spawn_member(&network, "a", &["b"]);
        let endpoint = network.endpoint(MemberId::from("b"));
        network.isolate(&MemberId::from("a"));
        assert!(endpoint.query_configuration(&MemberId::from("a")).await.is_err());
        network.heal(&MemberId::from("a"));
        assert!(endpoint.query_configuration(&MemberId::from("a")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_member_is_a_transport_error() {
        let network = LocalNetwork::new();
        let endpoint = network.endpoint(MemberId::from("a"));
        let err = endpoint
            .send(&MemberId::from("ghost"), GossipMessage::Query {
                sender: MemberId::from("a"),
                request_id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Transport(_)));
    }
}
