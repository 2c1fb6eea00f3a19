//! ember-persistence: durable local state for a cluster member.
//!
//! Provides the checksummed meta-file format and an atomic single-file
//! store used to keep the last known cluster configuration across
//! restarts.

pub mod format;
pub mod meta;

pub use format::FormatError;
pub use meta::MetaFile;
