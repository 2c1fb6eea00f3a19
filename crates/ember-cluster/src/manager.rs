//! The configuration manager actor.
//!
//! Owns the local configuration and its file. Every replacement of the
//! configuration happens here, in one task, in this order: persist, publish
//! to subscribers, hand to gossip. Other tasks talk to the manager through
//! a [`ManagerHandle`].
//!
//! # Operation application
//!
//! Whenever the configuration changes, the manager checks whether the head
//! of the pending plan is addressed to the local member. If it is, and no
//! operation is already in flight, it:
//!
//! 1. asks the registered [`ChangeAppliers`] for an applier and runs its
//!    `init`, replacing the configuration with the provisional result,
//! 2. runs `apply` on a separate task,
//! 3. on success, advances the plan, but only if the configuration version
//!    still equals the one `init` saw and the operation is still the head.
//!    Otherwise the change was cancelled or superseded meanwhile and the
//!    result is dropped as stale.
//!
//! Failures are retried after an exponential backoff. A panicking applier
//! counts as a failure. A failure of a stale operation is not retried; the
//! new head is evaluated right away. While a retry is scheduled, incoming
//! gossip does not trigger application.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::applier::{ChangeAppliers, ConfigTransformer};
use crate::backoff::ExponentialBackoff;
use crate::change::now_ms;
use crate::configuration::ClusterConfiguration;
use crate::gossip::{GossipEvent, GossipHandle};
use crate::init::Initializer;
use crate::member::MemberId;
use crate::operation::ClusterConfigurationChangeOperation;
use crate::persisted::PersistedClusterConfiguration;
use crate::ClusterError;

/// Told when a merge changed what is recorded for the local member without
/// the local member doing it.
pub trait InconsistentConfigurationListener: Send + Sync {
    fn on_inconsistent(&self, old: &ClusterConfiguration, new: &ClusterConfiguration);
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A change requested through [`ManagerHandle::update`].
pub type UpdateFn =
    Box<dyn FnOnce(&ClusterConfiguration) -> Result<ClusterConfiguration, ClusterError> + Send>;

enum ManagerCommand {
    Initialize {
        initializer: Initializer,
        reply: oneshot::Sender<Result<ClusterConfiguration, ClusterError>>,
    },
    Configuration(oneshot::Sender<ClusterConfiguration>),
    Update {
        update: UpdateFn,
        reply: oneshot::Sender<Result<ClusterConfiguration, ClusterError>>,
    },
    RegisterAppliers(Arc<dyn ChangeAppliers>),
    RemoveAppliers,
    AddListener {
        listener: Arc<dyn InconsistentConfigurationListener>,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener(ListenerId),
}

/// Completion of an operation running outside the actor.
struct ApplyCompleted {
    /// Configuration version the operation was initialized against.
    version: u64,
    operation: ClusterConfigurationChangeOperation,
    result: Result<ConfigTransformer, ClusterError>,
}

/// Local state of the manager. Lives inside the actor task.
pub struct ConfigurationManager {
    local_id: MemberId,
    persisted: PersistedClusterConfiguration,
    gossip: GossipHandle,
    published: watch::Sender<ClusterConfiguration>,
    appliers: Option<Arc<dyn ChangeAppliers>>,
    listeners: Vec<(ListenerId, Arc<dyn InconsistentConfigurationListener>)>,
    next_listener_id: u64,
    backoff: ExponentialBackoff,
    /// An operation is between `init` and the end of `apply`.
    in_progress: bool,
    /// A failed operation will be retried at this instant.
    retry_at: Option<Instant>,
    completed_tx: mpsc::UnboundedSender<ApplyCompleted>,
    completed_rx: mpsc::UnboundedReceiver<ApplyCompleted>,
}

impl ConfigurationManager {
    pub fn new(
        local_id: MemberId,
        persisted: PersistedClusterConfiguration,
        gossip: GossipHandle,
        backoff: ExponentialBackoff,
    ) -> Self {
        let (published, _) = watch::channel(persisted.configuration().clone());
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            local_id,
            persisted,
            gossip,
            published,
            appliers: None,
            listeners: Vec::new(),
            next_listener_id: 0,
            backoff,
            in_progress: false,
            retry_at: None,
            completed_tx,
            completed_rx,
        }
    }

    fn current(&self) -> &ClusterConfiguration {
        self.persisted.configuration()
    }

    fn is_initialized(&self) -> bool {
        !self.current().is_uninitialized()
    }

    /// Persists, publishes and gossips `next`. Returns false if `next` equals
    /// the current configuration.
    async fn replace(&mut self, next: ClusterConfiguration) -> Result<bool, ClusterError> {
        if !self.persisted.update(next.clone())? {
            return Ok(false);
        }
        debug!(
            member = %self.local_id,
            version = next.version,
            "configuration replaced"
        );
        self.published.send_replace(next.clone());
        self.gossip.update(next).await?;
        Ok(true)
    }

    async fn initialize(&mut self, initializer: Initializer) -> Result<ClusterConfiguration, ClusterError> {
        if self.is_initialized() {
            return Ok(self.current().clone());
        }
        let configuration = initializer.initialize().await?;
        if configuration.is_uninitialized() {
            error!(member = %self.local_id, "no configuration could be found or generated");
            return Err(ClusterError::Uninitialized);
        }
        self.replace(configuration.clone()).await?;
        info!(
            member = %self.local_id,
            version = configuration.version,
            members = configuration.members.len(),
            "configuration initialized"
        );
        self.evaluate().await;
        Ok(configuration)
    }

    async fn update(&mut self, update: UpdateFn) -> Result<ClusterConfiguration, ClusterError> {
        if !self.is_initialized() {
            return Err(ClusterError::Uninitialized);
        }
        let next = update(self.current())?;
        self.replace(next.clone()).await?;
        self.evaluate().await;
        Ok(next)
    }

    async fn on_received(&mut self, from: MemberId, received: ClusterConfiguration) {
        if !self.is_initialized() {
            trace!(from = %from, "not initialized, ignoring received configuration");
            return;
        }
        let merged = self.current().merge(&received);
        if merged == *self.current() {
            trace!(from = %from, "received configuration changes nothing");
            return;
        }

        let old = self.current().clone();
        if let Err(e) = self.replace(merged).await {
            warn!(from = %from, "failed to adopt merged configuration: {e}");
            return;
        }
        if old.member_changed_externally(self.current(), &self.local_id) {
            warn!(
                member = %self.local_id,
                from = %from,
                "local member state was changed by another member"
            );
            let new = self.current().clone();
            for (_, listener) in &self.listeners {
                listener.on_inconsistent(&old, &new);
            }
        }

        if self.retry_at.is_none() {
            self.evaluate().await;
        }
    }

    /// Starts the next operation for the local member, if there is one and
    /// nothing is in flight.
    async fn evaluate(&mut self) {
        if self.in_progress || !self.is_initialized() {
            return;
        }
        let Some(appliers) = self.appliers.clone() else {
            return;
        };
        let Some(operation) = self.current().pending_change_for(&self.local_id).cloned() else {
            return;
        };

        let version = self.current().version;
        let mut applier = appliers.applier_for(&operation);
        let provisional = match applier.init(self.current()) {
            Ok(provisional) => provisional,
            Err(e) => {
                self.schedule_retry(&operation, e);
                return;
            }
        };

        info!(%operation, version, "applying operation");
        self.in_progress = true;
        let next = provisional(self.current().clone());
        if let Err(e) = self.replace(next).await {
            self.in_progress = false;
            self.schedule_retry(&operation, e);
            return;
        }

        let completed_tx = self.completed_tx.clone();
        tokio::spawn(async move {
            // a panicking applier must still report back, or nothing is ever
            // applied on this member again
            let result = match AssertUnwindSafe(async move { applier.apply().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ClusterError::ApplyFailed("operation applier panicked".into())),
            };
            let _ = completed_tx.send(ApplyCompleted {
                version,
                operation,
                result,
            });
        });
    }

    async fn on_completed(&mut self, completed: ApplyCompleted) {
        self.in_progress = false;
        let ApplyCompleted {
            version,
            operation,
            result,
        } = completed;

        let stale = self.current().version != version
            || self.current().pending_change_for(&self.local_id) != Some(&operation);
        match result {
            Ok(transformer) => {
                if stale {
                    debug!(
                        %operation,
                        initialized_at = version,
                        current = self.current().version,
                        "discarding stale operation result"
                    );
                } else {
                    let next = self
                        .current()
                        .clone()
                        .advance_configuration_change(transformer, now_ms());
                    if let Err(e) = self.replace(next).await {
                        self.schedule_retry(&operation, e);
                        return;
                    }
                    self.backoff.reset();
                    info!(%operation, version = self.current().version, "operation completed");
                    if self.current().pending_changes.is_none() {
                        if let Some(last) = &self.current().last_change {
                            info!(change = last.id, status = %last.status, "configuration change finished");
                        }
                    }
                }
                self.evaluate().await;
            }
            Err(e) if stale => {
                debug!(
                    %operation,
                    initialized_at = version,
                    current = self.current().version,
                    "ignoring failure of stale operation: {e}"
                );
                self.evaluate().await;
            }
            Err(e) => self.schedule_retry(&operation, e),
        }
    }

    fn schedule_retry(&mut self, operation: &ClusterConfigurationChangeOperation, e: ClusterError) {
        let delay = self.backoff.next_delay();
        warn!(%operation, retry_in = ?delay, "operation failed: {e}");
        self.retry_at = Some(Instant::now() + delay);
    }

    async fn on_retry(&mut self) {
        self.retry_at = None;
        self.evaluate().await;
    }
}

/// Cloneable handle to a running manager.
#[derive(Clone)]
pub struct ManagerHandle {
    local_id: MemberId,
    tx: mpsc::Sender<ManagerCommand>,
    published: watch::Receiver<ClusterConfiguration>,
}

impl ManagerHandle {
    pub fn local_id(&self) -> &MemberId {
        &self.local_id
    }

    /// Runs `initializer` unless the manager already holds a configuration.
    ///
    /// Fails with [`ClusterError::Uninitialized`] if the pipeline yields no
    /// configuration.
    pub async fn initialize(&self, initializer: Initializer) -> Result<ClusterConfiguration, ClusterError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Initialize { initializer, reply }).await?;
        rx.await.map_err(|_| ClusterError::Unavailable)?
    }

    pub async fn configuration(&self) -> Result<ClusterConfiguration, ClusterError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Configuration(reply)).await?;
        rx.await.map_err(|_| ClusterError::Unavailable)
    }

    /// Replaces the configuration with the result of `update`.
    pub async fn update<F>(&self, update: F) -> Result<ClusterConfiguration, ClusterError>
    where
        F: FnOnce(&ClusterConfiguration) -> Result<ClusterConfiguration, ClusterError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Update {
            update: Box::new(update),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClusterError::Unavailable)?
    }

    /// Lets the local member execute operations addressed to it.
    pub async fn register_appliers(&self, appliers: Arc<dyn ChangeAppliers>) -> Result<(), ClusterError> {
        self.send(ManagerCommand::RegisterAppliers(appliers)).await
    }

    /// Stops executing operations. One already in flight still completes.
    pub async fn remove_appliers(&self) -> Result<(), ClusterError> {
        self.send(ManagerCommand::RemoveAppliers).await
    }

    pub async fn add_listener(
        &self,
        listener: Arc<dyn InconsistentConfigurationListener>,
    ) -> Result<ListenerId, ClusterError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::AddListener { listener, reply }).await?;
        rx.await.map_err(|_| ClusterError::Unavailable)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<(), ClusterError> {
        self.send(ManagerCommand::RemoveListener(id)).await
    }

    /// Watches the local configuration. Updated after every persisted
    /// replacement.
    pub fn subscribe(&self) -> watch::Receiver<ClusterConfiguration> {
        self.published.clone()
    }

    async fn send(&self, cmd: ManagerCommand) -> Result<(), ClusterError> {
        self.tx.send(cmd).await.map_err(|_| ClusterError::Unavailable)
    }
}

/// Spawns the manager actor.
///
/// `events` carries configurations received by gossip. The actor exits
/// when every [`ManagerHandle`] has been dropped.
pub fn spawn_manager(
    manager: ConfigurationManager,
    events: mpsc::Receiver<GossipEvent>,
    buffer: usize,
) -> ManagerHandle {
    let (tx, rx) = mpsc::channel(buffer);
    let handle = ManagerHandle {
        local_id: manager.local_id.clone(),
        tx,
        published: manager.published.subscribe(),
    };
    tokio::spawn(run_manager(manager, rx, events));
    handle
}

async fn run_manager(
    mut manager: ConfigurationManager,
    mut rx: mpsc::Receiver<ManagerCommand>,
    mut events: mpsc::Receiver<GossipEvent>,
) {
    let mut events_open = true;
    loop {
        let retry_deadline = manager.retry_at.unwrap_or_else(Instant::now);
        // completions and gossip go before requests, so a request sent after
        // an event observes its effect
        tokio::select! {
            biased;

            Some(completed) = manager.completed_rx.recv() => {
                manager.on_completed(completed).await;
            }

            event = events.recv(), if events_open => {
                match event {
                    Some(GossipEvent::ConfigurationReceived { from, configuration }) => {
                        manager.on_received(from, configuration).await;
                    }
                    None => events_open = false,
                }
            }

            _ = tokio::time::sleep_until(retry_deadline), if manager.retry_at.is_some() => {
                manager.on_retry().await;
            }

            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!(member = %manager.local_id, "manager shutting down");
                    break;
                };
                match cmd {
                    ManagerCommand::Initialize { initializer, reply } => {
                        let _ = reply.send(manager.initialize(initializer).await);
                    }
                    ManagerCommand::Configuration(reply) => {
                        let _ = reply.send(manager.current().clone());
                    }
                    ManagerCommand::Update { update, reply } => {
                        let _ = reply.send(manager.update(update).await);
                    }
                    ManagerCommand::RegisterAppliers(appliers) => {
                        manager.appliers = Some(appliers);
                        if manager.retry_at.is_none() {
                            manager.evaluate().await;
                        }
                    }
                    ManagerCommand::RemoveAppliers => {
                        manager.appliers = None;
                    }
                    ManagerCommand::AddListener { listener, reply } => {
                        let id = ListenerId(manager.next_listener_id);
                        manager.next_listener_id += 1;
                        manager.listeners.push((id, listener));
                        let _ = reply.send(id);
                    }
                    ManagerCommand::RemoveListener(id) => {
                        manager.listeners.retain(|(l, _)| *l != id);
                    }
                }
            }
        }
    }
}
