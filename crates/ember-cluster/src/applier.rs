//! Operation appliers.
//!
//! Applying one operation of a change plan is a two-step affair:
//!
//! 1. `init` validates the operation against the current configuration and
//!    returns a provisional transform (e.g. marking a partition as joining).
//!    The manager persists and gossips the provisional configuration right
//!    away so the rest of the cluster sees the change is underway.
//! 2. `apply` performs the actual external effect and, on success, returns
//!    the transform that completes the operation.
//!
//! Both transforms are pure. [`prepare`] and [`complete`] expose them
//! without any side effects so the coordinator can simulate a whole plan
//! before accepting it.

use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use crate::configuration::ClusterConfiguration;
use crate::distribution::ReplicaSet;
use crate::member::{
    DynamicPartitionConfig, MemberId, MemberState, MemberStatus, PartitionId, PartitionState,
    PartitionStatus,
};
use crate::operation::ClusterConfigurationChangeOperation as Op;
use crate::routing::RoutingState;
use crate::ClusterError;

/// A pure configuration update.
pub type ConfigTransformer = Box<dyn FnOnce(ClusterConfiguration) -> ClusterConfiguration + Send>;

pub type ExecutorResult = BoxFuture<'static, Result<(), ClusterError>>;

/// Applies one operation addressed to the local member.
pub trait OperationApplier: Send {
    /// Validates the operation and returns the provisional transform.
    fn init(&mut self, current: &ClusterConfiguration) -> Result<ConfigTransformer, ClusterError>;

    /// Performs the operation. Only called after a successful `init`.
    fn apply(self: Box<Self>) -> BoxFuture<'static, Result<ConfigTransformer, ClusterError>>;
}

/// Creates appliers for operations. Registered with the manager by the host.
pub trait ChangeAppliers: Send + Sync {
    fn applier_for(&self, operation: &Op) -> Box<dyn OperationApplier>;
}

/// Host side of partition operations.
pub trait PartitionChangeExecutor: Send + Sync {
    fn join(
        &self,
        partition: PartitionId,
        replicas: ReplicaSet,
        config: DynamicPartitionConfig,
    ) -> ExecutorResult;

    fn leave(&self, partition: PartitionId, minimum_allowed_replicas: u32) -> ExecutorResult;

    fn bootstrap(
        &self,
        partition: PartitionId,
        priority: u32,
        config: DynamicPartitionConfig,
    ) -> ExecutorResult;

    fn reconfigure_priority(&self, partition: PartitionId, priority: u32) -> ExecutorResult;

    fn force_reconfigure(&self, partition: PartitionId, members: Vec<MemberId>) -> ExecutorResult;

    fn enable_exporter(
        &self,
        partition: PartitionId,
        exporter_id: String,
        metadata_version: u64,
        initialize_from: Option<String>,
    ) -> ExecutorResult;

    fn disable_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult;

    fn delete_exporter(&self, partition: PartitionId, exporter_id: String) -> ExecutorResult;
}

/// Host side of membership operations.
pub trait MembershipChangeExecutor: Send + Sync {
    fn add_member(&self, member: MemberId) -> ExecutorResult;

    fn remove_member(&self, member: MemberId) -> ExecutorResult;

    /// Drops local history of members that have left.
    fn delete_history(&self) -> ExecutorResult;
}

/// The external effect of an operation, as decided by [`prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AddMember(MemberId),
    RemoveMember(MemberId),
    JoinPartition {
        partition: PartitionId,
        replicas: ReplicaSet,
        config: DynamicPartitionConfig,
    },
    LeavePartition {
        partition: PartitionId,
        minimum_allowed_replicas: u32,
    },
    BootstrapPartition {
        partition: PartitionId,
        priority: u32,
        config: DynamicPartitionConfig,
    },
    ReconfigurePriority {
        partition: PartitionId,
        priority: u32,
    },
    ForceReconfigure {
        partition: PartitionId,
        members: Vec<MemberId>,
    },
    EnableExporter {
        partition: PartitionId,
        exporter_id: String,
        metadata_version: u64,
        initialize_from: Option<String>,
    },
    DisableExporter {
        partition: PartitionId,
        exporter_id: String,
    },
    DeleteExporter {
        partition: PartitionId,
        exporter_id: String,
    },
    DeleteHistory,
    /// Configuration-only operation.
    Nothing,
}

/// Result of validating an operation.
pub struct Prepared {
    pub provisional: ConfigTransformer,
    pub effect: Effect,
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}

fn identity() -> ConfigTransformer {
    Box::new(|c| c)
}

fn prepared(provisional: ConfigTransformer, effect: Effect) -> Result<Prepared, ClusterError> {
    Ok(Prepared {
        provisional,
        effect,
    })
}

/// Validates `operation` against `current` and decides its provisional
/// transform and external effect.
///
/// Operations are retried after failures, so validation accepts the state
/// left behind by this operation's own provisional transform.
pub fn prepare(operation: &Op, current: &ClusterConfiguration) -> Result<Prepared, ClusterError> {
    match operation.clone() {
        Op::MemberJoin { member_id } => match current.member(&member_id) {
            None => {
                let effect = Effect::AddMember(member_id.clone());
                prepared(
                    Box::new(move |c| c.add_member(member_id, MemberState::joining())),
                    effect,
                )
            }
            Some(m) if m.status == MemberStatus::Joining => {
                prepared(identity(), Effect::AddMember(member_id))
            }
            Some(m) => Err(ClusterError::not_allowed(format!(
                "member {member_id} is already part of the cluster ({})",
                m.status
            ))),
        },

        Op::MemberLeave { member_id } => {
            let member = require_member(current, &member_id)?;
            if !member.partitions.is_empty() {
                return Err(ClusterError::not_allowed(format!(
                    "member {member_id} still hosts partitions {:?}",
                    member.partitions.keys().collect::<Vec<_>>()
                )));
            }
            match member.status {
                MemberStatus::Active => {
                    let id = member_id.clone();
                    prepared(
                        Box::new(move |c| c.update_member(&id, |m| m.to_leaving())),
                        Effect::RemoveMember(member_id),
                    )
                }
                MemberStatus::Leaving => prepared(identity(), Effect::RemoveMember(member_id)),
                status => Err(ClusterError::not_allowed(format!(
                    "member {member_id} can't leave while {status}"
                ))),
            }
        }

        Op::MemberRemove {
            member_to_remove, ..
        } => {
            require_member(current, &member_to_remove)?;
            prepared(identity(), Effect::RemoveMember(member_to_remove))
        }

        Op::PartitionJoin {
            member_id,
            partition_id,
            priority,
        } => {
            let member = require_active_member(current, &member_id)?;
            let mut replicas = current.replicas_of(partition_id);
            replicas.remove(&member_id);
            let Some(config) = existing_config(current, partition_id, &member_id) else {
                return Err(ClusterError::not_allowed(format!(
                    "partition {partition_id} has no replicas to join"
                )));
            };
            replicas.insert(member_id.clone(), priority);
            let effect = Effect::JoinPartition {
                partition: partition_id,
                replicas,
                config: config.clone(),
            };
            match member.partition(partition_id).map(|p| p.status) {
                None => prepared(
                    Box::new(move |c| {
                        c.update_member(&member_id, |m| {
                            m.add_partition(partition_id, PartitionState::joining(priority, config))
                        })
                    }),
                    effect,
                ),
                Some(PartitionStatus::Joining) => prepared(identity(), effect),
                Some(status) => Err(ClusterError::not_allowed(format!(
                    "member {member_id} already hosts partition {partition_id} ({status:?})"
                ))),
            }
        }

        Op::PartitionLeave {
            member_id,
            partition_id,
            minimum_allowed_replicas,
        } => {
            let member = require_active_member(current, &member_id)?;
            let Some(state) = member.partition(partition_id) else {
                return Err(ClusterError::not_allowed(format!(
                    "member {member_id} does not host partition {partition_id}"
                )));
            };
            let remaining = current.replicas_of(partition_id).len().saturating_sub(1);
            if remaining == 0 || (remaining as u32) < minimum_allowed_replicas {
                return Err(ClusterError::not_allowed(format!(
                    "partition {partition_id} would be left with {remaining} replicas, \
                     at least {} required",
                    minimum_allowed_replicas.max(1)
                )));
            }
            let effect = Effect::LeavePartition {
                partition: partition_id,
                minimum_allowed_replicas,
            };
            match state.status {
                PartitionStatus::Active => prepared(
                    Box::new(move |c| {
                        c.update_member(&member_id, |m| {
                            m.update_partition(partition_id, PartitionState::to_leaving)
                        })
                    }),
                    effect,
                ),
                PartitionStatus::Leaving => prepared(identity(), effect),
                status => Err(ClusterError::not_allowed(format!(
                    "partition {partition_id} on {member_id} can't leave while {status:?}"
                ))),
            }
        }

        Op::PartitionReconfigurePriority {
            member_id,
            partition_id,
            priority,
        } => {
            require_active_partition(current, &member_id, partition_id)?;
            prepared(
                identity(),
                Effect::ReconfigurePriority {
                    partition: partition_id,
                    priority,
                },
            )
        }

        Op::PartitionForceReconfigure {
            member_id,
            partition_id,
            members,
        } => {
            require_active_partition(current, &member_id, partition_id)?;
            if !members.contains(&member_id) {
                return Err(ClusterError::not_allowed(format!(
                    "forced replica set of partition {partition_id} must include {member_id}"
                )));
            }
            let replicas = current.replicas_of(partition_id);
            if let Some(stranger) = members.iter().find(|m| !replicas.contains_key(*m)) {
                return Err(ClusterError::not_allowed(format!(
                    "member {stranger} does not host partition {partition_id}"
                )));
            }
            prepared(
                identity(),
                Effect::ForceReconfigure {
                    partition: partition_id,
                    members,
                },
            )
        }

        Op::PartitionBootstrap {
            member_id,
            partition_id,
            priority,
            config,
        } => {
            let member = require_active_member(current, &member_id)?;
            let replicas = current.replicas_of(partition_id);
            let config = config
                .or_else(|| lowest_partition_config(current))
                .unwrap_or_default();
            let effect = Effect::BootstrapPartition {
                partition: partition_id,
                priority,
                config: config.clone(),
            };
            match member.partition(partition_id).map(|p| p.status) {
                None if replicas.is_empty() => prepared(
                    Box::new(move |c| {
                        c.update_member(&member_id, |m| {
                            m.add_partition(
                                partition_id,
                                PartitionState::bootstrapping(priority, config),
                            )
                        })
                    }),
                    effect,
                ),
                Some(PartitionStatus::Bootstrapping) if replicas.len() == 1 => {
                    prepared(identity(), effect)
                }
                _ => Err(ClusterError::not_allowed(format!(
                    "partition {partition_id} already exists"
                ))),
            }
        }

        Op::PartitionEnableExporter {
            member_id,
            partition_id,
            exporter_id,
            initialize_from,
        } => {
            let state = require_active_partition(current, &member_id, partition_id)?;
            if let Some(source) = &initialize_from {
                if state.config.exporter(source).is_none() {
                    return Err(ClusterError::not_allowed(format!(
                        "exporter {source} to initialize {exporter_id} from does not exist \
                         on partition {partition_id}"
                    )));
                }
            }
            let metadata_version = state
                .config
                .exporter(&exporter_id)
                .map(|e| e.metadata_version + 1)
                .unwrap_or(1);
            prepared(
                identity(),
                Effect::EnableExporter {
                    partition: partition_id,
                    exporter_id,
                    metadata_version,
                    initialize_from,
                },
            )
        }

        Op::PartitionDisableExporter {
            member_id,
            partition_id,
            exporter_id,
        } => {
            require_exporter(current, &member_id, partition_id, &exporter_id)?;
            prepared(
                identity(),
                Effect::DisableExporter {
                    partition: partition_id,
                    exporter_id,
                },
            )
        }

        Op::PartitionDeleteExporter {
            member_id,
            partition_id,
            exporter_id,
        } => {
            require_exporter(current, &member_id, partition_id, &exporter_id)?;
            prepared(
                identity(),
                Effect::DeleteExporter {
                    partition: partition_id,
                    exporter_id,
                },
            )
        }

        Op::DeleteHistory { .. } => prepared(identity(), Effect::DeleteHistory),

        Op::UpdateRoutingState { .. } => prepared(identity(), Effect::Nothing),
    }
}

/// Returns the transform that records `operation` as done.
pub fn complete(operation: &Op) -> ConfigTransformer {
    match operation.clone() {
        Op::MemberJoin { member_id } => {
            Box::new(move |c| c.update_member(&member_id, |m| m.to_active()))
        }

        Op::MemberLeave { member_id } => {
            Box::new(move |c| c.update_member(&member_id, |m| m.to_left()))
        }

        Op::MemberRemove {
            member_to_remove, ..
        } => Box::new(move |c| c.remove_member(&member_to_remove)),

        Op::PartitionJoin {
            member_id,
            partition_id,
            ..
        }
        | Op::PartitionBootstrap {
            member_id,
            partition_id,
            ..
        } => Box::new(move |c| {
            c.update_member(&member_id, |m| {
                m.update_partition(partition_id, PartitionState::to_active)
            })
        }),

        Op::PartitionLeave {
            member_id,
            partition_id,
            ..
        } => Box::new(move |c| {
            c.update_member(&member_id, |m| m.remove_partition(partition_id))
        }),

        Op::PartitionReconfigurePriority {
            member_id,
            partition_id,
            priority,
        } => Box::new(move |c| {
            c.update_member(&member_id, |m| {
                m.update_partition(partition_id, |p| p.with_priority(priority))
            })
        }),

        Op::PartitionForceReconfigure {
            partition_id,
            members,
            ..
        } => Box::new(move |c| {
            let outsiders: Vec<MemberId> = c
                .replicas_of(partition_id)
                .into_keys()
                .filter(|m| !members.contains(m))
                .collect();
            outsiders.iter().fold(c, |c, m| {
                c.update_member(m, |s| s.remove_partition(partition_id))
            })
        }),

        Op::PartitionEnableExporter {
            member_id,
            partition_id,
            exporter_id,
            initialize_from,
        } => update_partition_config(member_id, partition_id, move |config| {
            config.enable_exporter(&exporter_id, initialize_from)
        }),

        Op::PartitionDisableExporter {
            member_id,
            partition_id,
            exporter_id,
        } => update_partition_config(member_id, partition_id, move |config| {
            config.disable_exporter(&exporter_id)
        }),

        Op::PartitionDeleteExporter {
            member_id,
            partition_id,
            exporter_id,
        } => update_partition_config(member_id, partition_id, move |config| {
            config.delete_exporter(&exporter_id)
        }),

        Op::DeleteHistory { .. } => Box::new(|c| {
            let left: Vec<MemberId> = c
                .members
                .iter()
                .filter(|(_, m)| m.status == MemberStatus::Left)
                .map(|(id, _)| id.clone())
                .collect();
            left.iter().fold(c, |c, id| c.remove_member(id))
        }),

        Op::UpdateRoutingState { routing_state, .. } => Box::new(move |c| {
            let routing = routing_state
                .unwrap_or_else(|| RoutingState::initial(c.partition_ids().len() as u32));
            c.set_routing_state(routing)
        }),
    }
}

/// Runs every operation's provisional and completion transforms in order,
/// without side effects. Returns the configuration the plan would produce.
pub fn simulate(
    current: &ClusterConfiguration,
    operations: &[Op],
) -> Result<ClusterConfiguration, ClusterError> {
    operations.iter().try_fold(current.clone(), |config, operation| {
        let prepared = prepare(operation, &config).map_err(|e| {
            ClusterError::invalid(format!("{operation} can't be applied: {e}"))
        })?;
        Ok(complete(operation)((prepared.provisional)(config)))
    })
}

fn update_partition_config(
    member_id: MemberId,
    partition_id: PartitionId,
    f: impl FnOnce(DynamicPartitionConfig) -> DynamicPartitionConfig + Send + 'static,
) -> ConfigTransformer {
    Box::new(move |c| {
        c.update_member(&member_id, |m| {
            m.update_partition(partition_id, |p| p.update_config(f))
        })
    })
}

fn require_member<'a>(
    current: &'a ClusterConfiguration,
    member_id: &MemberId,
) -> Result<&'a MemberState, ClusterError> {
    current
        .member(member_id)
        .ok_or_else(|| ClusterError::not_allowed(format!("member {member_id} is not part of the cluster")))
}

fn require_active_member<'a>(
    current: &'a ClusterConfiguration,
    member_id: &MemberId,
) -> Result<&'a MemberState, ClusterError> {
    let member = require_member(current, member_id)?;
    if member.status != MemberStatus::Active {
        return Err(ClusterError::not_allowed(format!(
            "member {member_id} is {}, not active",
            member.status
        )));
    }
    Ok(member)
}

fn require_active_partition<'a>(
    current: &'a ClusterConfiguration,
    member_id: &MemberId,
    partition_id: PartitionId,
) -> Result<&'a PartitionState, ClusterError> {
    let member = require_active_member(current, member_id)?;
    match member.partition(partition_id) {
        Some(state) if state.status == PartitionStatus::Active => Ok(state),
        Some(state) => Err(ClusterError::not_allowed(format!(
            "partition {partition_id} on {member_id} is {:?}, not active",
            state.status
        ))),
        None => Err(ClusterError::not_allowed(format!(
            "member {member_id} does not host partition {partition_id}"
        ))),
    }
}

fn require_exporter(
    current: &ClusterConfiguration,
    member_id: &MemberId,
    partition_id: PartitionId,
    exporter_id: &str,
) -> Result<(), ClusterError> {
    let state = require_active_partition(current, member_id, partition_id)?;
    if state.config.exporter(exporter_id).is_none() {
        return Err(ClusterError::not_allowed(format!(
            "exporter {exporter_id} does not exist on partition {partition_id}"
        )));
    }
    Ok(())
}

/// Config of `partition` as recorded by some other replica.
fn existing_config(
    current: &ClusterConfiguration,
    partition: PartitionId,
    except: &MemberId,
) -> Option<DynamicPartitionConfig> {
    current
        .members
        .iter()
        .filter(|(id, _)| *id != except)
        .find_map(|(_, m)| m.partition(partition))
        .map(|p| p.config.clone())
}

fn lowest_partition_config(current: &ClusterConfiguration) -> Option<DynamicPartitionConfig> {
    let lowest = current.partition_ids().into_iter().next()?;
    current
        .members
        .values()
        .find_map(|m| m.partition(lowest))
        .map(|p| p.config.clone())
}

// -- executor-backed appliers --

/// Appliers that delegate external effects to host executors.
#[derive(Clone)]
pub struct ExecutorAppliers {
    partitions: Arc<dyn PartitionChangeExecutor>,
    membership: Arc<dyn MembershipChangeExecutor>,
}

impl ExecutorAppliers {
    pub fn new(
        partitions: Arc<dyn PartitionChangeExecutor>,
        membership: Arc<dyn MembershipChangeExecutor>,
    ) -> Self {
        Self {
            partitions,
            membership,
        }
    }
}

impl ChangeAppliers for ExecutorAppliers {
    fn applier_for(&self, operation: &Op) -> Box<dyn OperationApplier> {
        Box::new(ExecutorApplier {
            operation: operation.clone(),
            appliers: self.clone(),
            effect: None,
        })
    }
}

struct ExecutorApplier {
    operation: Op,
    appliers: ExecutorAppliers,
    effect: Option<Effect>,
}

impl OperationApplier for ExecutorApplier {
    fn init(&mut self, current: &ClusterConfiguration) -> Result<ConfigTransformer, ClusterError> {
        let prepared = prepare(&self.operation, current)?;
        self.effect = Some(prepared.effect);
        Ok(prepared.provisional)
    }

    fn apply(self: Box<Self>) -> BoxFuture<'static, Result<ConfigTransformer, ClusterError>> {
        let ExecutorApplier {
            operation,
            appliers,
            effect,
        } = *self;
        let Some(effect) = effect else {
            return future::ready(Err(ClusterError::ApplyFailed(format!(
                "{operation} was not initialized"
            ))))
            .boxed();
        };
        let execution = run_effect(&appliers, effect);
        async move {
            execution.await?;
            debug!(%operation, "operation executed");
            Ok(complete(&operation))
        }
        .boxed()
    }
}

fn run_effect(appliers: &ExecutorAppliers, effect: Effect) -> ExecutorResult {
    let partitions = &appliers.partitions;
    let membership = &appliers.membership;
    match effect {
        Effect::AddMember(member) => membership.add_member(member),
        Effect::RemoveMember(member) => membership.remove_member(member),
        Effect::JoinPartition {
            partition,
            replicas,
            config,
        } => partitions.join(partition, replicas, config),
        Effect::LeavePartition {
            partition,
            minimum_allowed_replicas,
        } => partitions.leave(partition, minimum_allowed_replicas),
        Effect::BootstrapPartition {
            partition,
            priority,
            config,
        } => partitions.bootstrap(partition, priority, config),
        Effect::ReconfigurePriority {
            partition,
            priority,
        } => partitions.reconfigure_priority(partition, priority),
        Effect::ForceReconfigure { partition, members } => {
            partitions.force_reconfigure(partition, members)
        }
        Effect::EnableExporter {
            partition,
            exporter_id,
            metadata_version,
            initialize_from,
        } => partitions.enable_exporter(partition, exporter_id, metadata_version, initialize_from),
        Effect::DisableExporter {
            partition,
            exporter_id,
        } => partitions.disable_exporter(partition, exporter_id),
        Effect::DeleteExporter {
            partition,
            exporter_id,
        } => partitions.delete_exporter(partition, exporter_id),
        Effect::DeleteHistory => membership.delete_history(),
        Effect::Nothing => future::ready(Ok(())).boxed(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording executors shared by the unit tests of this crate.

    use std::sync::Mutex;

    use super::*;

    /// Records every effect it is asked to run. Fails while `failing` is set.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub calls: Mutex<Vec<String>>,
        pub failing: std::sync::atomic::AtomicBool,
    }

    impl RecordingExecutor {
        fn record(&self, call: String) -> ExecutorResult {
            self.calls.lock().unwrap().push(call);
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                future::ready(Err(ClusterError::ApplyFailed("injected".into()))).boxed()
            } else {
                future::ready(Ok(())).boxed()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PartitionChangeExecutor for RecordingExecutor {
        fn join(&self, p: PartitionId, replicas: ReplicaSet, _: DynamicPartitionConfig) -> ExecutorResult {
            self.record(format!("join {p} {}", replicas.len()))
        }
        fn leave(&self, p: PartitionId, _: u32) -> ExecutorResult {
            self.record(format!("leave {p}"))
        }
        fn bootstrap(&self, p: PartitionId, _: u32, _: DynamicPartitionConfig) -> ExecutorResult {
            self.record(format!("bootstrap {p}"))
        }
        fn reconfigure_priority(&self, p: PartitionId, priority: u32) -> ExecutorResult {
            self.record(format!("priority {p} {priority}"))
        }
        fn force_reconfigure(&self, p: PartitionId, members: Vec<MemberId>) -> ExecutorResult {
            self.record(format!("force {p} {}", members.len()))
        }
        fn enable_exporter(&self, p: PartitionId, e: String, v: u64, _: Option<String>) -> ExecutorResult {
            self.record(format!("enable {p} {e} {v}"))
        }
        fn disable_exporter(&self, p: PartitionId, e: String) -> ExecutorResult {
            self.record(format!("disable {p} {e}"))
        }
        fn delete_exporter(&self, p: PartitionId, e: String) -> ExecutorResult {
            self.record(format!("delete {p} {e}"))
        }
    }

    impl MembershipChangeExecutor for RecordingExecutor {
        fn add_member(&self, m: MemberId) -> ExecutorResult {
            self.record(format!("add {m}"))
        }
        fn remove_member(&self, m: MemberId) -> ExecutorResult {
            self.record(format!("remove {m}"))
        }
        fn delete_history(&self) -> ExecutorResult {
            self.record("delete-history".into())
        }
    }

    pub fn appliers(executor: &Arc<RecordingExecutor>) -> ExecutorAppliers {
        ExecutorAppliers::new(executor.clone(), executor.clone())
    }
}
