//! Configuration gossip.
//!
//! Spreads the local configuration to peers and collects theirs.
//!
//! # Protocol
//!
//! - When the owner hands us a new configuration, push it to `fanout`
//!   random peers.
//! - Every `sync_interval`, send a `Sync` with our configuration to one
//!   random peer. The peer merges it and replies with its own.
//! - `Query` messages are answered with our configuration verbatim and
//!   never merged.
//!
//! The engine never merges received configurations into what it
//! broadcasts. It forwards them to its owner (the manager) as
//! [`GossipEvent`]s, and only rebroadcasts what the owner hands back after
//! persisting. A merged view of everything received is kept separately for
//! bootstrap waiters.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::prelude::IndexedRandom;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::configuration::ClusterConfiguration;
use crate::member::MemberId;
use crate::message::GossipMessage;
use crate::transport::GossipTransport;
use crate::ClusterError;

/// Configuration for the gossip protocol.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// How often to sync with a random peer.
    pub sync_interval: Duration,
    /// How many peers to push to when the local configuration changes.
    pub fanout: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(1),
            fanout: 2,
        }
    }
}

/// Events emitted by the gossip engine.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    /// A peer sent an initialized configuration.
    ConfigurationReceived {
        from: MemberId,
        configuration: ClusterConfiguration,
    },
}

/// Everything gossip has heard from peers so far.
#[derive(Debug, Clone, Default)]
pub struct GossipView {
    /// Merge of every initialized configuration received.
    pub merged: ClusterConfiguration,
    /// Peers that told us they have no configuration yet.
    pub uninitialized_peers: BTreeSet<MemberId>,
}

/// The gossip engine: protocol state without any I/O.
pub struct ConfigGossip {
    local_id: MemberId,
    peers: Vec<MemberId>,
    config: GossipConfig,
    /// What we broadcast. Only replaced through [`update`](Self::update).
    state: ClusterConfiguration,
    view: watch::Sender<GossipView>,
    event_tx: mpsc::Sender<GossipEvent>,
}

impl ConfigGossip {
    /// Creates a new gossip engine.
    pub fn new(
        local_id: MemberId,
        peers: Vec<MemberId>,
        config: GossipConfig,
        event_tx: mpsc::Sender<GossipEvent>,
    ) -> Self {
        let peers = peers.into_iter().filter(|p| *p != local_id).collect();
        let (view, _) = watch::channel(GossipView::default());
        Self {
            local_id,
            peers,
            config,
            state: ClusterConfiguration::uninitialized(),
            view,
            event_tx,
        }
    }

    pub fn local_id(&self) -> &MemberId {
        &self.local_id
    }

    /// Returns the configuration we currently broadcast.
    pub fn state(&self) -> &ClusterConfiguration {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<GossipView> {
        self.view.subscribe()
    }

    /// Replaces the broadcast configuration.
    ///
    /// Returns pushes for a random subset of peers, or nothing if the
    /// configuration is unchanged.
    pub fn update(&mut self, configuration: ClusterConfiguration) -> Vec<(MemberId, GossipMessage)> {
        if configuration == self.state {
            return Vec::new();
        }
        self.state = configuration;
        let msg = GossipMessage::Push {
            sender: self.local_id.clone(),
            configuration: self.state.clone(),
        };
        self.peers
            .choose_multiple(&mut rand::rng(), self.config.fanout)
            .map(|peer| (peer.clone(), msg.clone()))
            .collect()
    }

    /// Pushes the current configuration to every peer, changed or not.
    pub fn announce(&self) -> Vec<(MemberId, GossipMessage)> {
        let msg = GossipMessage::Push {
            sender: self.local_id.clone(),
            configuration: self.state.clone(),
        };
        self.peers
            .iter()
            .map(|peer| (peer.clone(), msg.clone()))
            .collect()
    }

    /// Handles an incoming gossip message, returning replies to send.
    pub fn handle_message(&mut self, msg: GossipMessage) -> Vec<(MemberId, GossipMessage)> {
        match msg {
            GossipMessage::Push {
                sender,
                configuration,
            } => {
                trace!(from = %sender, version = configuration.version, "received push");
                self.observe(sender, configuration);
                Vec::new()
            }

            GossipMessage::Sync {
                sender,
                configuration,
            } => {
                trace!(from = %sender, version = configuration.version, "received sync");
                self.observe(sender.clone(), configuration);
                vec![(
                    sender,
                    GossipMessage::SyncReply {
                        sender: self.local_id.clone(),
                        configuration: self.state.clone(),
                    },
                )]
            }

            GossipMessage::SyncReply {
                sender,
                configuration,
            } => {
                trace!(from = %sender, version = configuration.version, "received sync reply");
                self.observe(sender, configuration);
                Vec::new()
            }

            GossipMessage::Query { sender, request_id } => {
                trace!(from = %sender, request_id, "answering configuration query");
                vec![(
                    sender,
                    GossipMessage::QueryReply {
                        sender: self.local_id.clone(),
                        request_id,
                        configuration: self.state.clone(),
                    },
                )]
            }

            GossipMessage::QueryReply { sender, request_id, .. } => {
                // replies are matched by the transport; one reaching us is late
                trace!(from = %sender, request_id, "ignoring unmatched query reply");
                Vec::new()
            }
        }
    }

    /// Runs one sync round: picks a random peer to exchange state with.
    pub fn tick(&mut self) -> Option<(MemberId, GossipMessage)> {
        let peer = self.peers.choose(&mut rand::rng())?;
        Some((
            peer.clone(),
            GossipMessage::Sync {
                sender: self.local_id.clone(),
                configuration: self.state.clone(),
            },
        ))
    }

    fn observe(&mut self, from: MemberId, configuration: ClusterConfiguration) {
        if configuration.is_uninitialized() {
            self.view.send_if_modified(|view| view.uninitialized_peers.insert(from));
            return;
        }

        self.view.send_if_modified(|view| {
            let known = view.uninitialized_peers.remove(&from);
            let merged = view.merged.merge(&configuration);
            if merged == view.merged {
                return known;
            }
            view.merged = merged;
            true
        });

        let event = GossipEvent::ConfigurationReceived {
            from,
            configuration,
        };
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            // the peer will send it again on a later round
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("gossip event channel full, dropping received configuration");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("gossip event receiver closed");
            }
        }
    }
}

enum GossipCommand {
    Update(ClusterConfiguration),
    Announce,
    Receive(GossipMessage),
    Current(oneshot::Sender<ClusterConfiguration>),
}

/// Cloneable handle to a running gossip actor.
#[derive(Clone)]
pub struct GossipHandle {
    local_id: MemberId,
    tx: mpsc::Sender<GossipCommand>,
    view: watch::Receiver<GossipView>,
}

impl GossipHandle {
    pub fn local_id(&self) -> &MemberId {
        &self.local_id
    }

    /// Hands gossip a new configuration to broadcast.
    pub async fn update(&self, configuration: ClusterConfiguration) -> Result<(), ClusterError> {
        self.tx
            .send(GossipCommand::Update(configuration))
            .await
            .map_err(|_| ClusterError::Unavailable)
    }

    /// Pushes the current configuration to every peer.
    pub async fn announce(&self) -> Result<(), ClusterError> {
        self.tx
            .send(GossipCommand::Announce)
            .await
            .map_err(|_| ClusterError::Unavailable)
    }

    /// Delivers an incoming message, waiting for queue space.
    pub async fn receive(&self, message: GossipMessage) -> Result<(), ClusterError> {
        self.tx
            .send(GossipCommand::Receive(message))
            .await
            .map_err(|_| ClusterError::Unavailable)
    }

    /// Delivers an incoming message without waiting. Fails if the queue is
    /// full or the actor is gone.
    pub fn try_receive(&self, message: GossipMessage) -> Result<(), ClusterError> {
        self.tx
            .try_send(GossipCommand::Receive(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ClusterError::Transport("gossip queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => ClusterError::Unavailable,
            })
    }

    /// Returns the configuration gossip currently broadcasts.
    pub async fn current(&self) -> Result<ClusterConfiguration, ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GossipCommand::Current(tx))
            .await
            .map_err(|_| ClusterError::Unavailable)?;
        rx.await.map_err(|_| ClusterError::Unavailable)
    }

    /// Watches everything gossip has heard from peers.
    pub fn subscribe(&self) -> watch::Receiver<GossipView> {
        self.view.clone()
    }
}

/// Spawns the gossip actor.
///
/// The actor exits when every [`GossipHandle`] has been dropped.
pub fn spawn_gossip(
    engine: ConfigGossip,
    transport: Arc<dyn GossipTransport>,
    buffer: usize,
) -> GossipHandle {
    let (tx, rx) = mpsc::channel(buffer);
    let handle = GossipHandle {
        local_id: engine.local_id.clone(),
        tx,
        view: engine.subscribe(),
    };
    tokio::spawn(run_gossip(engine, transport, rx));
    handle
}

async fn run_gossip(
    mut engine: ConfigGossip,
    transport: Arc<dyn GossipTransport>,
    mut rx: mpsc::Receiver<GossipCommand>,
) {
    let mut tick_interval = tokio::time::interval(engine.config.sync_interval);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                if let Some((peer, msg)) = engine.tick() {
                    send_all(&*transport, vec![(peer, msg)]).await;
                }
            }

            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!(member = %engine.local_id, "gossip actor shutting down");
                    break;
                };
                let outgoing = match cmd {
                    GossipCommand::Update(configuration) => engine.update(configuration),
                    GossipCommand::Announce => engine.announce(),
                    GossipCommand::Receive(msg) => engine.handle_message(msg),
                    GossipCommand::Current(reply) => {
                        let _ = reply.send(engine.state.clone());
                        Vec::new()
                    }
                };
                send_all(&*transport, outgoing).await;
            }
        }
    }
}

async fn send_all(transport: &dyn GossipTransport, outgoing: Vec<(MemberId, GossipMessage)>) {
    for (peer, msg) in outgoing {
        if let Err(e) = transport.send(&peer, msg).await {
            debug!(peer = %peer, "gossip send failed: {e}");
        }
    }
}
