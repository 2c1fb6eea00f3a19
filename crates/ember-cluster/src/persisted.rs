//! The locally persisted cluster configuration.

use std::path::PathBuf;

use ember_persistence::MetaFile;
use tracing::debug;

use crate::codec;
use crate::configuration::ClusterConfiguration;
use crate::ClusterError;

/// File name of the persisted configuration inside a data directory.
pub const META_FILE_NAME: &str = ".topology.meta";

/// Reads the configuration stored in `file`.
///
/// A missing file is the uninitialized configuration. A file that exists
/// but can't be trusted is an error, never silently treated as missing.
pub fn read_configuration(file: &MetaFile) -> Result<ClusterConfiguration, ClusterError> {
    match file.load()? {
        Some(body) => codec::decode(&body),
        None => Ok(ClusterConfiguration::uninitialized()),
    }
}

/// The configuration this member last made durable, paired with its file.
///
/// Owned by the manager actor; nothing else writes the file.
#[derive(Debug)]
pub struct PersistedClusterConfiguration {
    file: MetaFile,
    current: ClusterConfiguration,
}

impl PersistedClusterConfiguration {
    /// Creates a store at `path` holding the uninitialized configuration.
    /// The file is not read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: MetaFile::new(path),
            current: ClusterConfiguration::uninitialized(),
        }
    }

    /// Opens the store at `path`, loading whatever it holds.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClusterError> {
        let file = MetaFile::new(path);
        let current = read_configuration(&file)?;
        Ok(Self { file, current })
    }

    /// Returns the last persisted configuration.
    pub fn configuration(&self) -> &ClusterConfiguration {
        &self.current
    }

    pub fn file(&self) -> &MetaFile {
        &self.file
    }

    /// Persists `config` if it differs from the current one.
    ///
    /// Returns `true` if the file was rewritten.
    pub fn update(&mut self, config: ClusterConfiguration) -> Result<bool, ClusterError> {
        if config == self.current {
            return Ok(false);
        }
        let body = codec::encode(&config)?;
        self.file.store(&body)?;
        debug!(
            version = config.version,
            path = %self.file.path().display(),
            "persisted cluster configuration"
        );
        self.current = config;
        Ok(true)
    }
}
