//! Binary framing for the meta file.
//!
//! A meta file is a fixed header followed by an opaque body:
//!
//! ```text
//! [version: 1B][crc32c(body): 8B little-endian][body]
//! ```
//!
//! The body encoding belongs to the caller. This module only guarantees
//! that a body read back is exactly the body that was written.

use std::io;

use thiserror::Error;

/// Current meta file format version.
pub const META_VERSION: u8 = 1;

/// Size of the fixed header: version byte plus an 8-byte checksum.
pub const HEADER_LEN: usize = 1 + 8;

/// Maximum body size accepted when decoding. A corrupt file can't
/// make us hold more than this in memory.
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Errors that can occur when reading or writing the meta format.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("meta file too short for header ({len} bytes, need {HEADER_LEN})")]
    MissingHeader { len: usize },

    #[error("unexpected meta format version {actual} (expected {expected})")]
    UnexpectedVersion { expected: u8, actual: u8 },

    #[error("crc32c mismatch (expected {expected:#018x}, got {actual:#018x})")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    /// Returns true when the bytes on disk can't be trusted, as opposed
    /// to a failure to reach them at all.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, FormatError::Io(_))
    }
}

/// Computes the CRC32-C checksum of `data`, widened to the on-disk width.
pub fn checksum(data: &[u8]) -> u64 {
    u64::from(crc32c::crc32c(data))
}

/// Frames `body` with the current version and its checksum.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, FormatError> {
    if body.len() > MAX_BODY_LEN {
        return Err(FormatError::InvalidData(format!(
            "body length {} exceeds maximum of {MAX_BODY_LEN}",
            body.len()
        )));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.push(META_VERSION);
    buf.extend_from_slice(&checksum(body).to_le_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Validates the header of `bytes` and returns the body slice.
pub fn decode_frame(bytes: &[u8]) -> Result<&[u8], FormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::MissingHeader { len: bytes.len() });
    }
    let version = bytes[0];
    if version != META_VERSION {
        return Err(FormatError::UnexpectedVersion {
            expected: META_VERSION,
            actual: version,
        });
    }

    let mut stored = [0u8; 8];
    stored.copy_from_slice(&bytes[1..HEADER_LEN]);
    let stored = u64::from_le_bytes(stored);

    let body = &bytes[HEADER_LEN..];
    if body.len() > MAX_BODY_LEN {
        return Err(FormatError::InvalidData(format!(
            "body length {} exceeds maximum of {MAX_BODY_LEN}",
            body.len()
        )));
    }
    verify_checksum(checksum(body), stored)?;
    Ok(body)
}

/// Verifies that two checksum values match.
pub fn verify_checksum(computed: u64, stored: u64) -> Result<(), FormatError> {
    if computed != stored {
        return Err(FormatError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }
    Ok(())
}
