//! Error types for mailvault

use crate::crypto::CryptoError;
use crate::types::{HvChallenge, LabelId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid login state")]
    InvalidLoginState,

    #[error("human verification requested")]
    HumanVerificationRequested(HvChallenge),

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {message}")]
    Net { message: String },

    #[error("API error {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("unauthorized")]
    Unauthorized,

    #[error("second factor code rejected")]
    TwoFactorFailed,

    #[error("mailbox password rejected")]
    MailboxPasswordRejected,

    #[error("failed to unlock user keys: {0}")]
    KeyUnlockFailed(String),

    #[error("keyring has no decryption entities")]
    NoDecryptionEntities,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("message counts do not contain the All Mail label")]
    AllMailLabelMissing,

    #[error("the total message count is unavailable")]
    TotalCountUnavailable,

    #[error("integrity check failed for {path}")]
    IntegrityCheckFailed { path: PathBuf },

    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("no importable mail found")]
    NoImportableMail,

    #[error("the folder contains more than one backup sub-folder")]
    AmbiguousBackupDir,

    #[error("the labels file '{0}' could not be found")]
    LabelsFileMissing(String),

    #[error("unable to sort labels because of a circular reference")]
    CircularLabelReference,

    #[error("no remote label mapped for backup label {0}")]
    LabelMappingNotFound(LabelId),

    #[error("failed to import message batch: {0}")]
    ImportBatchFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the auto-retry layer may repeat the failed request.
    ///
    /// Transient failures are network-level errors, unexpected EOF
    /// while reading a response, and server-side throttling or
    /// breakage (HTTP 429 and 5xx). Cancellation is never transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Net { .. } => true,
            Self::Io(err) => matches!(err.kind(), io::ErrorKind::UnexpectedEof),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The human-verification challenge carried by this error, if any.
    #[must_use]
    pub const fn hv_challenge(&self) -> Option<&HvChallenge> {
        match self {
            Self::HumanVerificationRequested(challenge) => Some(challenge),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
