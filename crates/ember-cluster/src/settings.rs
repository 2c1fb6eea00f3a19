//! Static settings for a member's configuration service.
//!
//! Loaded from the `[cluster]` table of the server config. Every field has
//! a default so partial tables work.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ExponentialBackoff;
use crate::gossip::GossipConfig;
use crate::member::MemberId;
use crate::ClusterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// This member's id.
    pub member_id: MemberId,
    /// Every member of the initial cluster, including this one.
    pub members: BTreeSet<MemberId>,
    /// The only member allowed to start configuration changes.
    pub coordinator: MemberId,
    pub partition_count: u32,
    pub replication_factor: u32,
    /// Exporters configured on this member.
    pub exporters: BTreeSet<String>,
    /// Initialize routing state on startup.
    pub routing_enabled: bool,
    /// Cluster id stamped by the coordinator. Generated when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    /// How often to run a push-pull sync with a random peer.
    pub sync_interval_ms: u64,
    /// Peers pushed to when the local configuration changes.
    pub gossip_fanout: usize,
    /// Delay between bootstrap query retries to an unresponsive peer.
    pub sync_retry_delay_ms: u64,
    /// Bounds for the operation retry backoff.
    pub retry_min_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        let local = MemberId::from("0");
        Self {
            member_id: local.clone(),
            members: BTreeSet::from([local.clone()]),
            coordinator: local,
            partition_count: 1,
            replication_factor: 1,
            exporters: BTreeSet::new(),
            routing_enabled: false,
            cluster_id: None,
            sync_interval_ms: 1_000,
            gossip_fanout: 2,
            sync_retry_delay_ms: 1_000,
            retry_min_ms: 1_000,
            retry_max_ms: 60_000,
        }
    }
}

impl ClusterSettings {
    pub fn is_coordinator(&self) -> bool {
        self.member_id == self.coordinator
    }

    /// Every statically known member except this one.
    pub fn peers(&self) -> Vec<MemberId> {
        self.members
            .iter()
            .filter(|m| **m != self.member_id)
            .cloned()
            .collect()
    }

    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            sync_interval: Duration::from_millis(self.sync_interval_ms),
            fanout: self.gossip_fanout,
        }
    }

    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_min_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }

    /// Rejects settings a member can't start with.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !self.members.contains(&self.member_id) {
            return Err(ClusterError::Configuration(format!(
                "member {} is not in the member set",
                self.member_id
            )));
        }
        if !self.members.contains(&self.coordinator) {
            return Err(ClusterError::Configuration(format!(
                "coordinator {} is not in the member set",
                self.coordinator
            )));
        }
        if self.partition_count == 0 {
            return Err(ClusterError::Configuration(
                "partition_count must be at least 1".into(),
            ));
        }
        if self.replication_factor == 0 || self.replication_factor as usize > self.members.len() {
            return Err(ClusterError::Configuration(format!(
                "replication_factor must be between 1 and {}",
                self.members.len()
            )));
        }
        if self.sync_interval_ms == 0 {
            return Err(ClusterError::Configuration(
                "sync_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three() -> ClusterSettings {
        ClusterSettings {
            member_id: MemberId::from("1"),
            members: ["0", "1", "2"].into_iter().map(MemberId::from).collect(),
            coordinator: MemberId::from("0"),
            partition_count: 3,
            replication_factor: 3,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        ClusterSettings::default().validate().unwrap();
        assert!(ClusterSettings::default().is_coordinator());
    }

    #[test]
    fn peers_exclude_self() {
        let s = three();
        assert_eq!(s.peers(), vec![MemberId::from("0"), MemberId::from("2")]);
        assert!(!s.is_coordinator());
    }

    #[test]
    fn replication_factor_bounded_by_members() {
        let mut s = three();
        s.replication_factor = 4;
        assert!(s.validate().is_err());
    }

    #[test]
    fn local_member_must_be_known() {
        let mut s = three();
        s.member_id = MemberId::from("9");
        assert!(matches!(s.validate(), Err(ClusterError::Configuration(_))));
    }

    #[test]
    fn parses_partial_json() {
        let s: ClusterSettings =
            serde_json::from_str(r#"{"member_id":"2","members":["1","2"],"coordinator":"1"}"#)
                .unwrap();
        assert_eq!(s.member_id, MemberId::from("2"));
        assert_eq!(s.partition_count, 1);
        assert_eq!(s.retry_max_ms, 60_000);
        s.validate().unwrap();
    }
}
