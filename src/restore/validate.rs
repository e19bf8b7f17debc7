//! Backup directory discovery and validation
//!
//! Only the top level of the directory is inspected. When it holds no
//! importable mail itself, exactly one timestamped `mail_YYYYMMDD_HHMMSS`
//! sub-folder may be descended into.

use crate::client::ClientBuilder;
use crate::error::{Error, Result};
use crate::export::LABELS_FILE_NAME;
use crate::export::write::metadata_file_name;
use crate::fileio::VersionedJson;
use crate::reporter::Reporter;
use crate::restore::RestoreTask;
use crate::types::{ArchivedMetadata, MESSAGE_METADATA_VERSION, MessageId};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

static MAIL_FOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mail_\d{8}_\d{6}$").expect("valid regex"));

/// One message found in the backup directory, keyed for the
/// oldest-first import order.
#[derive(Debug, Clone)]
pub(crate) struct ImportableMessage {
    pub(crate) id: MessageId,
    pub(crate) time: i64,
}

/// Read and decode a `<id>.metadata.json` file.
pub(crate) fn load_metadata(path: &Path) -> Result<ArchivedMetadata> {
    let bytes = std::fs::read(path)?;
    Ok(VersionedJson::<ArchivedMetadata>::from_bytes(MESSAGE_METADATA_VERSION, &bytes)?.payload)
}

impl<B: ClientBuilder> RestoreTask<'_, B> {
    /// Locate the importable mail, sorted by ascending time
    /// (oldest-first import is part of the contract).
    pub(crate) fn validate_backup_dir(
        &mut self,
        reporter: &dyn Reporter,
    ) -> Result<Vec<ImportableMessage>> {
        loop {
            info!(dir = %self.backup_dir.display(), "verifying backup folder");

            let (mut messages, sub_dirs) = self.scan_dir()?;

            if !messages.is_empty() {
                if !self.backup_dir.join(LABELS_FILE_NAME).is_file() {
                    return Err(Error::LabelsFileMissing(LABELS_FILE_NAME.to_string()));
                }

                reporter.set_message_total(messages.len() as u64);
                reporter.set_message_processed(0);
                info!(count = messages.len(), "found importable messages");

                messages.sort_by_key(|m| m.time);
                return Ok(messages);
            }

            match sub_dirs.len() {
                0 => return Err(Error::NoImportableMail),
                1 => {
                    info!(
                        dir = %sub_dirs[0].display(),
                        "inspecting backup sub-folder"
                    );
                    self.backup_dir.clone_from(&sub_dirs[0]);
                }
                _ => return Err(Error::AmbiguousBackupDir),
            }
        }
    }

    /// One pass over the top level: importable messages plus
    /// timestamped sub-folders.
    fn scan_dir(&self) -> Result<(Vec<ImportableMessage>, Vec<PathBuf>)> {
        let mut messages = Vec::new();
        let mut sub_dirs = Vec::new();

        for entry in std::fs::read_dir(&self.backup_dir)? {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if path.is_dir() {
                if MAIL_FOLDER_RE.is_match(name) {
                    sub_dirs.push(path);
                }
                continue;
            }

            let Some(stem) = name.strip_suffix(".eml") else {
                continue;
            };

            let id = MessageId::from(stem);
            let metadata_path = self.backup_dir.join(metadata_file_name(&id));
            if !metadata_path.is_file() {
                warn!(path = %path.display(), "eml file has no metadata file, skipping");
                continue;
            }

            match load_metadata(&metadata_path) {
                Ok(metadata) => messages.push(ImportableMessage {
                    id: metadata.id,
                    time: metadata.time,
                }),
                Err(err) => {
                    warn!(
                        path = %metadata_path.display(),
                        error = %err,
                        "metadata file is invalid, skipping"
                    );
                }
            }
        }

        Ok((messages, sub_dirs))
    }
}
