//! Write stage: atomic, checksummed persistence
//!
//! Lays messages out per the archive format:
//!
//! ```text
//! labels.json
//! <msg-id>.metadata.json
//! <msg-id>.eml                 -- DecryptedAndBuilt
//! <msg-id>/                    -- FailedToAssemble | NoAddressKey
//!     body.txt | body.pgp
//!     <att-id>_<name> | <att-id>_<name>.pgp
//! ```
//!
//! The metadata file is written last: a crash mid-message leaves no
//! metadata behind, so the resumability checker re-fetches it.

use crate::error::{Error, Result};
use crate::export::build::{AttachmentPart, BuiltMessage, MessagePart, MessageWriter};
use crate::export::metadata::MetadataFileChecker;
use crate::fileio::{Sha256IntegrityChecker, VersionedJson, write_file_safe};
use crate::reporter::{ErrorReporter, Reporter};
use crate::types::{ArchivedMetadata, Attachment, MESSAGE_METADATA_VERSION, MessageId, WriterType};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) const PARALLEL_WRITERS: usize = 4;

pub(crate) fn eml_file_name(id: &MessageId) -> String {
    format!("{id}.eml")
}

pub(crate) fn metadata_file_name(id: &MessageId) -> String {
    format!("{id}.metadata.json")
}

fn sanitize_file_name(name: &str) -> String {
    name.replace(['/', '\\', '\0'], "_")
}

fn attachment_file_name(attachment: &Attachment, decrypted: bool) -> String {
    let name = sanitize_file_name(&attachment.name);
    if decrypted {
        format!("{}_{name}", attachment.id)
    } else {
        format!("{}_{name}.pgp", attachment.id)
    }
}

pub(crate) struct WriteStage {
    dir: PathBuf,
    temp_dir: PathBuf,
    writers: usize,
}

impl WriteStage {
    pub(crate) fn new(dir: &Path, temp_dir: &Path, writers: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            temp_dir: temp_dir.to_path_buf(),
            writers,
        }
    }

    pub(crate) async fn run(
        self,
        cancel: &CancellationToken,
        mut input: mpsc::Receiver<Vec<BuiltMessage>>,
        reporter: &dyn Reporter,
        errors: &ErrorReporter,
    ) {
        debug!(stage = "write", "starting");

        while let Some(batch) =
            crate::export::download::recv_cancellable(cancel, &mut input).await
        {
            if cancel.is_cancelled() {
                break;
            }

            let count = batch.len();
            let (dir, temp_dir) = (self.dir.as_path(), self.temp_dir.as_path());
            let results: Vec<Result<()>> = futures::stream::iter(batch)
                .map(|message| async move { write_message(dir, temp_dir, &message) })
                .buffered(self.writers)
                .collect()
                .await;

            let mut failed = false;
            for result in results {
                if let Err(err) = result {
                    errors.report(err);
                    failed = true;
                }
            }
            if failed {
                break;
            }

            reporter.on_progress(count);
        }

        debug!(stage = "write", "exiting");
    }
}

/// Write one message's payload and then its metadata file.
pub(crate) fn write_message(dir: &Path, temp_dir: &Path, message: &BuiltMessage) -> Result<()> {
    let id = &message.metadata.id;

    match &message.writer {
        MessageWriter::DecryptedAndBuilt { eml } => {
            let checker = Sha256IntegrityChecker::new(eml);
            write_file_safe(temp_dir, &dir.join(eml_file_name(id)), eml, Some(&checker))?;
        }
        MessageWriter::FailedToAssemble { body, attachments }
        | MessageWriter::NoAddressKey { body, attachments } => {
            write_message_parts(dir, temp_dir, &message.metadata, body, attachments)?;
        }
    }

    let metadata_bytes =
        VersionedJson::new(MESSAGE_METADATA_VERSION, &message.metadata).to_bytes()?;
    let checker = Sha256IntegrityChecker::new(&metadata_bytes);
    write_file_safe(
        temp_dir,
        &dir.join(metadata_file_name(id)),
        &metadata_bytes,
        Some(&checker),
    )?;

    Ok(())
}

fn write_message_parts(
    dir: &Path,
    temp_dir: &Path,
    metadata: &ArchivedMetadata,
    body: &MessagePart,
    attachments: &[AttachmentPart],
) -> Result<()> {
    let message_dir = dir.join(metadata.id.as_str());
    std::fs::create_dir_all(&message_dir)?;

    let body_name = if body.decrypted { "body.txt" } else { "body.pgp" };
    let checker = Sha256IntegrityChecker::new(&body.data);
    write_file_safe(
        temp_dir,
        &message_dir.join(body_name),
        &body.data,
        Some(&checker),
    )?;

    for attachment in attachments {
        let descriptor = metadata
            .attachments
            .iter()
            .find(|a| a.id == attachment.id)
            .ok_or_else(|| {
                Error::Config(format!(
                    "attachment {} missing from metadata of message {}",
                    attachment.id, metadata.id
                ))
            })?;

        let name = attachment_file_name(descriptor, attachment.part.decrypted);
        let checker = Sha256IntegrityChecker::new(&attachment.part.data);
        write_file_safe(
            temp_dir,
            &message_dir.join(name),
            &attachment.part.data,
            Some(&checker),
        )?;
    }

    Ok(())
}

/// Checks a message's presence against the full layout invariant: the
/// metadata file must decode with the current version, and the
/// sibling `.eml` or part directory must be complete for the recorded
/// writer type. Anything less counts as missing and is re-fetched.
pub struct ArchiveFileChecker {
    dir: PathBuf,
}

impl ArchiveFileChecker {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn parts_complete(&self, metadata: &ArchivedMetadata, encrypted_only: bool) -> bool {
        let message_dir = self.dir.join(metadata.id.as_str());

        let body_ok = if encrypted_only {
            message_dir.join("body.pgp").is_file()
        } else {
            message_dir.join("body.txt").is_file() || message_dir.join("body.pgp").is_file()
        };
        if !body_ok {
            return false;
        }

        metadata.attachments.iter().all(|attachment| {
            let encrypted = message_dir.join(attachment_file_name(attachment, false));
            if encrypted_only {
                encrypted.is_file()
            } else {
                encrypted.is_file()
                    || message_dir
                        .join(attachment_file_name(attachment, true))
                        .is_file()
            }
        })
    }
}

impl MetadataFileChecker for ArchiveFileChecker {
    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let metadata_path = self.dir.join(metadata_file_name(id));
        let bytes = match std::fs::read(&metadata_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let metadata =
            match VersionedJson::<ArchivedMetadata>::from_bytes(MESSAGE_METADATA_VERSION, &bytes) {
                Ok(envelope) => envelope.payload,
                // Not decodable with the current version: re-fetch.
                Err(Error::VersionMismatch { .. } | Error::Json(_)) => return Ok(false),
                Err(err) => return Err(err),
            };

        let present = match metadata.writer_type {
            WriterType::DecryptedAndBuilt => self.dir.join(eml_file_name(id)).is_file(),
            WriterType::FailedToAssemble => self.parts_complete(&metadata, false),
            WriterType::NoAddressKey => self.parts_complete(&metadata, true),
        };

        Ok(present)
    }
}
