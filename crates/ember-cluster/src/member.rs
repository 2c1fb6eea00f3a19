//! Per-member and per-partition state.
//!
//! Every value here is immutable in spirit: helpers take `self` and return
//! the updated value. Updates made through [`MemberState`] helpers bump the
//! member's own version so that newer knowledge about a member always wins
//! a merge.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a partition. Partitions are numbered from 1.
pub type PartitionId = u32;

/// Stable identifier of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a member id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a member.
///
/// Legal transitions are `Joining -> Active` and `Active -> Leaving -> Left`.
/// A member in any state may be removed from the configuration entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberStatus {
    Uninitialized,
    Joining,
    Active,
    Leaving,
    Left,
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Uninitialized => write!(f, "uninitialized"),
            MemberStatus::Joining => write!(f, "joining"),
            MemberStatus::Active => write!(f, "active"),
            MemberStatus::Leaving => write!(f, "leaving"),
            MemberStatus::Left => write!(f, "left"),
        }
    }
}

/// Everything the cluster knows about one member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberState {
    /// Bumped on every change to this member.
    pub version: u64,
    pub status: MemberStatus,
    pub partitions: BTreeMap<PartitionId, PartitionState>,
}

impl MemberState {
    /// An active member hosting the given partitions.
    pub fn active(partitions: BTreeMap<PartitionId, PartitionState>) -> Self {
        Self {
            version: 0,
            status: MemberStatus::Active,
            partitions,
        }
    }

    /// A member that is in the process of joining. Hosts nothing yet.
    pub fn joining() -> Self {
        Self {
            version: 0,
            status: MemberStatus::Joining,
            partitions: BTreeMap::new(),
        }
    }

    pub fn to_active(self) -> Self {
        self.with_status(MemberStatus::Active)
    }

    pub fn to_leaving(self) -> Self {
        self.with_status(MemberStatus::Leaving)
    }

    pub fn to_left(self) -> Self {
        self.with_status(MemberStatus::Left)
    }

    fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self.version += 1;
        self
    }

    /// Adds (or replaces) a partition on this member.
    pub fn add_partition(mut self, id: PartitionId, state: PartitionState) -> Self {
        self.partitions.insert(id, state);
        self.version += 1;
        self
    }

    /// Applies `f` to a hosted partition. Unknown partitions are left alone
    /// and do not bump the version.
    pub fn update_partition(
        mut self,
        id: PartitionId,
        f: impl FnOnce(PartitionState) -> PartitionState,
    ) -> Self {
        if let Some(state) = self.partitions.remove(&id) {
            self.partitions.insert(id, f(state));
            self.version += 1;
        }
        self
    }

    /// Removes a partition from this member.
    pub fn remove_partition(mut self, id: PartitionId) -> Self {
        if self.partitions.remove(&id).is_some() {
            self.version += 1;
        }
        self
    }

    pub fn has_partition(&self, id: PartitionId) -> bool {
        self.partitions.contains_key(&id)
    }

    pub fn partition(&self, id: PartitionId) -> Option<&PartitionState> {
        self.partitions.get(&id)
    }

    /// Merges two views of the same member.
    ///
    /// The higher version wins. On a tie the view hosting more partitions
    /// wins, and if that is also equal the greater value by total order
    /// wins, so every member resolves the tie the same way.
    pub fn merge(self, other: MemberState) -> MemberState {
        let ord = self
            .version
            .cmp(&other.version)
            .then_with(|| self.partitions.len().cmp(&other.partitions.len()))
            .then_with(|| self.cmp(&other));
        match ord {
            Ordering::Less => other,
            Ordering::Equal | Ordering::Greater => self,
        }
    }
}

/// Lifecycle of one partition replica on one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionStatus {
    Joining,
    Active,
    Leaving,
    Bootstrapping,
}

/// State of a partition replica hosted by a member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionState {
    pub status: PartitionStatus,
    /// Higher priority replicas are preferred as leaders.
    pub priority: u32,
    pub config: DynamicPartitionConfig,
}

impl PartitionState {
    pub fn active(priority: u32, config: DynamicPartitionConfig) -> Self {
        Self {
            status: PartitionStatus::Active,
            priority,
            config,
        }
    }

    pub fn joining(priority: u32, config: DynamicPartitionConfig) -> Self {
        Self {
            status: PartitionStatus::Joining,
            priority,
            config,
        }
    }

    pub fn bootstrapping(priority: u32, config: DynamicPartitionConfig) -> Self {
        Self {
            status: PartitionStatus::Bootstrapping,
            priority,
            config,
        }
    }

    pub fn to_active(mut self) -> Self {
        self.status = PartitionStatus::Active;
        self
    }

    pub fn to_leaving(mut self) -> Self {
        self.status = PartitionStatus::Leaving;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn update_config(
        mut self,
        f: impl FnOnce(DynamicPartitionConfig) -> DynamicPartitionConfig,
    ) -> Self {
        self.config = f(self.config);
        self
    }
}

/// Partition configuration that can change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DynamicPartitionConfig {
    /// Exporter name to its recorded state.
    pub exporters: BTreeMap<String, ExporterState>,
}

impl DynamicPartitionConfig {
    /// A config with every named exporter enabled at metadata version 0.
    pub fn with_enabled_exporters<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exporters = names
            .into_iter()
            .map(|n| (n.into(), ExporterState::enabled(0, None)))
            .collect();
        Self { exporters }
    }

    pub fn exporter(&self, id: &str) -> Option<&ExporterState> {
        self.exporters.get(id)
    }

    /// Enables an exporter, bumping its metadata version so the exporter
    /// starts from fresh metadata (or from `initialize_from`'s).
    pub fn enable_exporter(mut self, id: &str, initialize_from: Option<String>) -> Self {
        let metadata_version = self
            .exporters
            .get(id)
            .map(|e| e.metadata_version + 1)
            .unwrap_or(1);
        self.exporters.insert(
            id.to_owned(),
            ExporterState::enabled(metadata_version, initialize_from),
        );
        self
    }

    pub fn disable_exporter(mut self, id: &str) -> Self {
        if let Some(state) = self.exporters.get_mut(id) {
            state.status = ExporterStatus::Disabled;
        }
        self
    }

    pub fn delete_exporter(mut self, id: &str) -> Self {
        self.exporters.remove(id);
        self
    }
}

/// Recorded state of an exporter on a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExporterState {
    pub metadata_version: u64,
    pub status: ExporterStatus,
    /// Exporter whose metadata this one was initialized from, if any.
    pub initialized_from: Option<String>,
}

impl ExporterState {
    pub fn enabled(metadata_version: u64, initialized_from: Option<String>) -> Self {
        Self {
            metadata_version,
            status: ExporterStatus::Enabled,
            initialized_from,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExporterStatus {
    Enabled,
    Disabled,
    /// Recorded in the cluster but not configured on this member.
    ConfigNotFound,
}
