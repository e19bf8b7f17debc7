//! Restore pipeline
//!
//! Sequential phases over a validated backup directory: locate and
//! validate the archive, reconcile labels with the remote side, then
//! import messages in batches.
//!
//! ## Module layout
//!
//! - `validate` -- backup directory discovery and validation
//! - `labels` -- topological sort + reconcile-or-create
//! - `import` -- batched import with per-batch fallback

pub mod import;
pub mod labels;
pub mod validate;

use crate::client::{Client, ClientBuilder};
use crate::error::{Error, Result};
use crate::keyring::{UnlockedKeyRing, derive_key_password};
use crate::reporter::Reporter;
use crate::session::{LoginState, Session};
use crate::types::LabelId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One restore run over a logged-in session.
pub struct RestoreTask<'a, B: ClientBuilder> {
    session: &'a Session<B>,
    backup_dir: PathBuf,
    cancel: CancellationToken,
    label_mapping: HashMap<LabelId, LabelId>,
    importable: u64,
    imported: u64,
    failed: u64,
    skipped: u64,
}

impl<'a, B: ClientBuilder> RestoreTask<'a, B> {
    pub fn new(session: &'a Session<B>, backup_dir: &Path) -> Result<Self> {
        if *session.login_state() != LoginState::LoggedIn {
            return Err(Error::InvalidLoginState);
        }

        Ok(Self {
            session,
            backup_dir: backup_dir.to_path_buf(),
            cancel: CancellationToken::new(),
            label_mapping: HashMap::new(),
            importable: 0,
            imported: 0,
            failed: 0,
            skipped: 0,
        })
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub const fn importable_count(&self) -> u64 {
        self.importable
    }

    #[must_use]
    pub const fn imported_count(&self) -> u64 {
        self.imported
    }

    #[must_use]
    pub const fn failed_count(&self) -> u64 {
        self.failed
    }

    #[must_use]
    pub const fn skipped_count(&self) -> u64 {
        self.skipped
    }

    /// Run validation, label reconciliation, and the import.
    pub async fn run(&mut self, reporter: &dyn Reporter) -> Result<()> {
        info!(dir = %self.backup_dir.display(), "starting restore");

        let messages = self.validate_backup_dir(reporter)?;
        self.importable = messages.len() as u64;

        let cancel = self.cancel.clone();
        let client = Arc::clone(self.session.client()?);
        let unlocker = self.session.unlocker().as_ref();

        let user = client.get_user(&cancel, None).await?;
        let salts = client.get_salts(&cancel).await?;
        let key_pass =
            derive_key_password(unlocker, &user, &salts, self.session.mailbox_password())?;
        let addresses = client.get_addresses(&cancel).await?;
        let mut keyring = UnlockedKeyRing::unlock(unlocker, &user, &addresses, &key_pass)?;

        let primary_address = addresses
            .first()
            .ok_or_else(|| Error::KeyUnlockFailed("account has no addresses".to_string()))?;

        let import_label = self.restore_labels().await?;

        let outcome = match keyring.address_keys(&primary_address.id) {
            Some(address_keys) => {
                self.import_messages(
                    client.as_ref(),
                    address_keys,
                    &primary_address.id,
                    &import_label,
                    messages,
                    reporter,
                )
                .await
            }
            None => Err(Error::NoDecryptionEntities),
        };

        keyring.close();
        outcome?;

        info!(
            importable = self.importable,
            imported = self.imported,
            failed = self.failed,
            skipped = self.skipped,
            "restore finished"
        );
        Ok(())
    }
}
