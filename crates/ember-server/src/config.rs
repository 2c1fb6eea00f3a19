//! Server configuration.
//!
//! Resolution order: defaults, then the TOML file, then env vars and CLI
//! flags (applied in `main`).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ember_cluster::{ClusterSettings, MemberId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding the persisted configuration.
    pub data_dir: String,
    /// UDP address for gossip.
    pub bind: String,
    /// Gossip address of every other member, by member id.
    pub peers: BTreeMap<String, String>,
    pub cluster: ClusterSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            bind: "127.0.0.1:26502".into(),
            peers: BTreeMap::new(),
            cluster: ClusterSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a config from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
        Self::from_toml(&contents)
            .map_err(|e| format!("invalid config file '{}': {e}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        self.bind
            .parse()
            .map_err(|e| format!("invalid bind address '{}': {e}", self.bind))
    }

    /// Resolves the address of every statically known peer.
    ///
    /// Every member other than the local one needs an entry in `peers`.
    pub fn peer_addrs(&self) -> Result<BTreeMap<MemberId, SocketAddr>, String> {
        let mut addrs = BTreeMap::new();
        for (id, addr) in &self.peers {
            let parsed: SocketAddr = addr
                .parse()
                .map_err(|e| format!("invalid address '{addr}' for peer {id}: {e}"))?;
            addrs.insert(MemberId::from(id.as_str()), parsed);
        }
        if let Some(missing) = self
            .cluster
            .peers()
            .into_iter()
            .find(|m| !addrs.contains_key(m))
        {
            return Err(format!("no address configured for member {missing}"));
        }
        Ok(addrs)
    }
}
