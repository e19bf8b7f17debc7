//! Export pipeline
//!
//! Four stages run concurrently, connected by bounded single-slot
//! channels: metadata paging, download, build, write. Memory-budget
//! sub-batching before every channel send bounds the resident message
//! bytes to roughly one sub-batch per stage.
//!
//! ## Module layout
//!
//! - `metadata` -- paginated cursor over message headers, skipping
//!   already-archived messages
//! - `download` -- parallel fetch of bodies and attachments
//! - `build` -- decrypt + RFC822 assembly with per-message fallback
//! - `write` -- atomic, checksummed writes

pub mod build;
pub mod download;
pub mod metadata;
pub mod write;

pub use build::{AttachmentPart, BuiltMessage, MessagePart, MessageWriter};
pub use download::FullMessage;
pub use metadata::{AlwaysMissingChecker, MetadataFileChecker};
pub use write::ArchiveFileChecker;

use crate::client::{Client, ClientBuilder};
use crate::error::{Error, Result};
use crate::fileio::{Sha256IntegrityChecker, VersionedJson, write_file_safe};
use crate::keyring::{UnlockedKeyRing, derive_key_password};
use crate::reporter::{ErrorReporter, Reporter};
use crate::session::{LoginState, Session};
use crate::types::{
    ALL_MAIL_LABEL, ARCHIVE_LABEL, DRAFTS_LABEL, INBOX_LABEL, LABEL_FILE_VERSION, Label,
    LabelType, SENT_LABEL, TRASH_LABEL,
};
use build::BuildStage;
use download::DownloadStage;
use metadata::MetadataStage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use write::WriteStage;

pub(crate) const LABELS_FILE_NAME: &str = "labels.json";

const METADATA_PAGE_SIZE: usize = 128;
const METADATA_SPLIT_SIZE: usize = 16;

/// System labels preserved in the archive's label file.
const PRESERVED_SYSTEM_LABELS: [&str; 5] = [
    INBOX_LABEL,
    ARCHIVE_LABEL,
    SENT_LABEL,
    DRAFTS_LABEL,
    TRASH_LABEL,
];

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Pick stage memory budgets from the machine's total RAM.
const fn memory_budgets(total_memory: u64) -> (u64, u64) {
    if total_memory >= 4 * GIB {
        (512 * MIB, 1024 * MIB)
    } else {
        (128 * MIB, 128 * MIB)
    }
}

fn total_system_memory() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.total_memory()
}

/// One export run over a logged-in session.
///
/// Owns the cancellation scope and the temp directory used for
/// atomic writes.
pub struct ExportTask<'a, B: ClientBuilder> {
    session: &'a Session<B>,
    export_dir: PathBuf,
    temp_dir: PathBuf,
    cancel: CancellationToken,
}

impl<B: ClientBuilder> std::fmt::Debug for ExportTask<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTask")
            .field("export_dir", &self.export_dir)
            .field("temp_dir", &self.temp_dir)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'a, B: ClientBuilder> ExportTask<'a, B> {
    /// The archive goes to `<root>/<account email>/mail/`.
    pub fn new(session: &'a Session<B>, root: &Path) -> Result<Self> {
        if *session.login_state() != LoginState::LoggedIn {
            return Err(Error::InvalidLoginState);
        }

        let export_dir = root.join(session.email()?).join("mail");
        let temp_dir = export_dir.join("temp");

        Ok(Self {
            session,
            export_dir,
            temp_dir,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Rough disk requirement: the reported mailbox size plus 30%
    /// overhead for metadata and MIME expansion.
    pub fn required_disk_space_estimate(&self) -> Result<u64> {
        let used = self.session.user()?.used_space;
        Ok(used.saturating_add(used.saturating_mul(3) / 10))
    }

    /// Run the pipeline to completion, cancellation, or first error.
    pub async fn run(&self, reporter: &dyn Reporter) -> Result<()> {
        info!(dir = %self.export_dir.display(), "starting export");

        self.prepare_directories()?;

        let cancel = &self.cancel;
        let client = Arc::clone(self.session.client()?);
        let unlocker = self.session.unlocker().as_ref();

        let user = client.get_user(cancel, None).await?;
        let salts = client.get_salts(cancel).await?;
        let key_pass =
            derive_key_password(unlocker, &user, &salts, self.session.mailbox_password())?;
        let addresses = client.get_addresses(cancel).await?;
        let mut keyring = UnlockedKeyRing::unlock(unlocker, &user, &addresses, &key_pass)?;

        self.write_labels(client.as_ref()).await?;

        let counts = client.get_grouped_message_count(cancel).await?;
        if counts.is_empty() {
            return Err(Error::TotalCountUnavailable);
        }
        let total = counts
            .iter()
            .find(|count| count.label_id.as_str() == ALL_MAIL_LABEL)
            .ok_or(Error::AllMailLabelMissing)?
            .total;
        reporter.set_message_total(total);
        reporter.set_message_processed(0);

        let (build_memory, download_memory) = memory_budgets(total_system_memory());
        info!(
            total_messages = total,
            build_memory, download_memory, "export pipeline configured"
        );

        let errors = ErrorReporter::new(cancel.clone());
        let checker = ArchiveFileChecker::new(&self.export_dir);

        let (metadata_tx, metadata_rx) = mpsc::channel(1);
        let (download_tx, download_rx) = mpsc::channel(1);
        let (build_tx, build_rx) = mpsc::channel(1);

        let metadata_stage = MetadataStage::new(METADATA_PAGE_SIZE, METADATA_SPLIT_SIZE);
        let download_stage = DownloadStage::new(download_memory, download::PARALLEL_DOWNLOADS);
        let build_stage = BuildStage::new(build_memory, build::PARALLEL_BUILDERS);
        let write_stage = WriteStage::new(&self.export_dir, &self.temp_dir, write::PARALLEL_WRITERS);

        tokio::join!(
            metadata_stage.run(
                cancel,
                client.as_ref(),
                &checker,
                reporter,
                &errors,
                metadata_tx
            ),
            download_stage.run(cancel, client.as_ref(), metadata_rx, download_tx, &errors),
            build_stage.run(cancel, &keyring, download_rx, build_tx, &errors),
            write_stage.run(cancel, build_rx, reporter, &errors),
        );

        keyring.close();

        if let Some(err) = errors.into_first() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!("export finished");
        Ok(())
    }

    /// Cancel the scope and clean up the temp directory.
    pub fn close(&self) {
        self.cancel.cancel();
        match std::fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "failed to remove temp directory"),
        }
    }

    fn prepare_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.export_dir)?;
        std::fs::create_dir_all(&self.temp_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in [&self.export_dir, &self.temp_dir] {
                let mut perms = std::fs::metadata(dir)?.permissions();
                perms.set_mode(0o700);
                std::fs::set_permissions(dir, perms)?;
            }
        }

        Ok(())
    }

    async fn write_labels(&self, client: &impl Client) -> Result<()> {
        let labels = client
            .get_labels(
                &self.cancel,
                &[LabelType::System, LabelType::Folder, LabelType::Label],
            )
            .await?;

        let preserved: Vec<Label> = labels
            .into_iter()
            .filter(|label| {
                !label.id.is_system() || PRESERVED_SYSTEM_LABELS.contains(&label.id.as_str())
            })
            .collect();

        let bytes = VersionedJson::new(LABEL_FILE_VERSION, &preserved).to_bytes()?;
        let checker = Sha256IntegrityChecker::new(&bytes);
        write_file_safe(
            &self.temp_dir,
            &self.export_dir.join(LABELS_FILE_NAME),
            &bytes,
            Some(&checker),
        )
    }
}
