//! Single-file durable store for a framed body.
//!
//! Each write replaces the whole file. The new contents go to a `.tmp`
//! sibling first, are fsynced, and are then renamed over the old file,
//! so a crash leaves either the previous file or the new one, never a
//! mix. A missing file is not an error: it means nothing was stored yet.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::format::{self, FormatError};

/// A meta file at a fixed path.
#[derive(Debug, Clone)]
pub struct MetaFile {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl MetaFile {
    /// Creates a handle for the meta file at `path`. Nothing is touched
    /// on disk until [`load`](Self::load) or [`store`](Self::store).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    /// Returns the path of the meta file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the file, returning its body.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load(&self) -> Result<Option<Vec<u8>>, FormatError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no meta file present");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let body = format::decode_frame(&bytes)?;
        Ok(Some(body.to_vec()))
    }

    /// Atomically replaces the file contents with a frame around `body`.
    pub fn store(&self, body: &[u8]) -> Result<(), FormatError> {
        let framed = format::encode_frame(body)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if let Err(e) = self.write_tmp(&framed) {
            // best-effort cleanup of the incomplete temp file
            let _ = fs::remove_file(&self.tmp_path);
            return Err(e.into());
        }
        fs::rename(&self.tmp_path, &self.path)?;
        self.sync_parent();
        Ok(())
    }

    fn write_tmp(&self, framed: &[u8]) -> io::Result<()> {
        let mut file = File::create(&self.tmp_path)?;
        file.write_all(framed)?;
        file.sync_all()
    }

    /// Flushes the directory entry so the rename itself survives a crash.
    fn sync_parent(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        if parent.as_os_str().is_empty() {
            return;
        }
        match File::open(parent) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    warn!(dir = %parent.display(), "failed to sync meta directory: {e}");
                }
            }
            Err(e) => warn!(dir = %parent.display(), "failed to open meta directory: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join(".topology.meta"));
        assert!(meta.load().unwrap().is_none());
    }

    #[test]
    fn store_then_load() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join(".topology.meta"));
        meta.store(b"first").unwrap();
        assert_eq!(meta.load().unwrap().unwrap(), b"first");
    }

    #[test]
    fn store_replaces_longer_contents() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join(".topology.meta"));
        meta.store(b"a much longer first body").unwrap();
        meta.store(b"short").unwrap();
        assert_eq!(meta.load().unwrap().unwrap(), b"short");
        let on_disk = fs::read(meta.path()).unwrap();
        assert_eq!(on_disk.len(), format::HEADER_LEN + 5);
    }

    #[test]
    fn store_leaves_no_temp_file() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join(".topology.meta"));
        meta.store(b"body").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(".topology.meta")]);
    }

    #[test]
    fn store_creates_missing_directory() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join("nested").join("data").join(".topology.meta"));
        meta.store(b"body").unwrap();
        assert_eq!(meta.load().unwrap().unwrap(), b"body");
    }

    #[test]
    fn truncated_file_missing_header() {
        let dir = temp_dir();
        let path = dir.path().join(".topology.meta");
        fs::write(&path, [format::META_VERSION, 1, 2]).unwrap();
        let err = MetaFile::new(&path).load().unwrap_err();
        assert!(matches!(err, FormatError::MissingHeader { len: 3 }));
    }

    #[test]
    fn zero_length_file_missing_header() {
        let dir = temp_dir();
        let path = dir.path().join(".topology.meta");
        fs::write(&path, []).unwrap();
        let err = MetaFile::new(&path).load().unwrap_err();
        assert!(matches!(err, FormatError::MissingHeader { len: 0 }));
    }

    #[test]
    fn corrupted_body_detected() {
        let dir = temp_dir();
        let meta = MetaFile::new(dir.path().join(".topology.meta"));
        meta.store(b"configuration body").unwrap();

        let mut bytes = fs::read(meta.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(meta.path(), &bytes).unwrap();

        let err = meta.load().unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch { .. }));
    }
}
