//! Body encoding for a [`ClusterConfiguration`].
//!
//! The same body is written to the meta file and carried inside gossip
//! messages.

use bincode::Options;

use crate::configuration::ClusterConfiguration;
use crate::ClusterError;

/// Largest body we'll produce or accept.
pub const MAX_BODY_LEN: u64 = ember_persistence::format::MAX_BODY_LEN as u64;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_BODY_LEN)
}

/// Serializes a configuration.
pub fn encode(config: &ClusterConfiguration) -> Result<Vec<u8>, ClusterError> {
    options()
        .serialize(config)
        .map_err(|e| ClusterError::Codec(e.to_string()))
}

/// Deserializes a configuration, rejecting trailing bytes.
pub fn decode(body: &[u8]) -> Result<ClusterConfiguration, ClusterError> {
    options()
        .reject_trailing_bytes()
        .deserialize(body)
        .map_err(|e| ClusterError::Codec(e.to_string()))
}
