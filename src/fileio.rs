//! Versioned JSON envelopes and atomic file writes
//!
//! Every archive file is a `{Version, Payload}` envelope written via
//! `write_file_safe`: the bytes land in a temporary file first, pass
//! an optional SHA-256 integrity check, and are renamed into place.
//! The temp directory must live on the same volume as the
//! destination for the rename to be atomic, which is why the export
//! task roots it inside the export directory.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedJson<T> {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Payload")]
    pub payload: T,
}

#[derive(Deserialize)]
struct VersionOnly {
    #[serde(rename = "Version")]
    version: u32,
}

impl<T> VersionedJson<T> {
    pub const fn new(version: u32, payload: T) -> Self {
        Self { version, payload }
    }
}

impl<T: Serialize> VersionedJson<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

impl<T: DeserializeOwned> VersionedJson<T> {
    /// Decode an envelope, checking the version before the payload.
    ///
    /// A version mismatch is reported without attempting to decode
    /// the payload; resumability logic treats it as "not present".
    pub fn from_bytes(expected_version: u32, bytes: &[u8]) -> Result<Self> {
        let probe: VersionOnly = serde_json::from_slice(bytes)?;
        if probe.version != expected_version {
            return Err(Error::VersionMismatch {
                expected: expected_version,
                actual: probe.version,
            });
        }

        Ok(serde_json::from_slice(bytes)?)
    }
}

/// SHA-256 of the in-memory bytes, checked against a fresh hash of
/// the written file before it is moved into place.
pub struct Sha256IntegrityChecker {
    hash: [u8; 32],
}

impl Sha256IntegrityChecker {
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            hash: Sha256::digest(data).into(),
        }
    }

    pub fn check(&self, path: &Path) -> Result<()> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;

        let on_disk: [u8; 32] = hasher.finalize().into();
        if on_disk != self.hash {
            return Err(Error::IntegrityCheckFailed {
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }
}

/// Write `data` to a temporary file under `temp_dir`, verify it, and
/// rename it to `dst`.
pub fn write_file_safe(
    temp_dir: &Path,
    dst: &Path,
    data: &[u8],
    integrity: Option<&Sha256IntegrityChecker>,
) -> Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix("mailvault-")
        .tempfile_in(temp_dir)?;

    file.write_all(data)?;
    file.flush()?;

    if let Some(checker) = integrity {
        checker.check(file.path())?;
    }

    file.persist(dst).map_err(|err| Error::Io(err.error))?;

    Ok(())
}
